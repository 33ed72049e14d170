//! Shared vocabulary for the missive delivery platform.
//!
//! Identifiers, template kinds, queue and recipient statuses, the injectable
//! clock, logging macros and structured audit events all live here so every
//! other crate speaks the same types.

pub mod audit;
pub mod clock;
pub mod error;
pub mod ids;
pub mod logging;
pub mod status;
pub mod template;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ParseError;
pub use ids::{CampaignId, ContentId, QueueItemId, RecipientId};
pub use status::{Cadence, QueueStatus, RecipientStatus};
pub use template::TemplateKind;
pub use tracing;

/// Process-wide lifecycle signal broadcast to long-running components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
