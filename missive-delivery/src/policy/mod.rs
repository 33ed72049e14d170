//! Policies applied by the queue.

pub mod retry;

pub use retry::{BackoffOverride, RetryPolicy};
