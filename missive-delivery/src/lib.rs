//! Asynchronous email delivery for missive.
//!
//! Jobs enter an [`EmailQueue`](queue::EmailQueue), are claimed atomically by
//! the [`DispatchProcessor`](processor::DispatchProcessor) tick, pass through
//! the [`SendPipeline`](pipeline::SendPipeline) (eligibility, address
//! resolution, tracking instrumentation, transport) and either leave as sent or
//! are rescheduled with exponential backoff until they are dead-lettered.
//! Digest and bulk campaign orchestrators feed the queue in resumable batches
//! driven by durable scheduled ticks.

pub mod bounce;
pub mod campaign;
pub mod content;
pub mod directory;
pub mod error;
pub mod events;
pub mod flags;
pub mod pipeline;
pub mod policy;
pub mod processor;
pub mod queue;
pub mod recipient;
pub mod scheduler;
pub mod service;
pub mod template;
pub mod tracking;
pub mod transport;

pub use campaign::{BatchOutcome, CampaignConfig, NewCampaign};
pub use error::{DeliveryError, SystemError, TransportError, ValidationError};
pub use events::DeliveryEvent;
pub use flags::{ControlFlags, Flag, FlagState, SendingConfig};
pub use policy::RetryPolicy;
pub use processor::{Collaborators, DispatchProcessor, TickReport};
pub use queue::{
    CleanupReport, EmailQueue, EnqueueRequest, FailureOutcome, QueueHealth, RetentionPolicy,
};
pub use service::QueueAdmin;
pub use tracking::{ClickOutcome, OpenOutcome, Tracker, TrackingConfig};
