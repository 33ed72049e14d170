//! Persistence for the missive delivery platform.
//!
//! Every table the delivery subsystem needs (queue items, dead letters,
//! tracking rows, the delivery log, bounces, campaign runs and scheduled
//! ticks) sits behind the [`BackingStore`] trait. All conditional updates are
//! single trait calls so that an implementation can make them atomic.

pub mod config;
pub mod error;
pub mod memory;
pub mod snapshot;
pub mod store;
pub mod types;

pub use config::StoreConfig;
pub use error::{Result, SerializationError, StoreError};
pub use memory::MemoryBackingStore;
pub use store::BackingStore;
pub use types::{
    BounceKind, BounceRecord, CampaignContent, CampaignGuard, CampaignRun, CampaignStatus,
    DeadLetterRecord, DeliveryLogEntry, DeliveryOutcome, FireOutcome, ItemFilter, QueueItem,
    ScheduledTick, TickId, TickPayload, TrackingEvent, TrackingKind,
};
