use async_trait::async_trait;
use chrono::{DateTime, Utc};
use missive_common::{CampaignId, ContentId, QueueItemId, QueueStatus, RecipientId};

use crate::{
    BounceRecord, CampaignGuard, CampaignRun, DeadLetterRecord, DeliveryLogEntry, FireOutcome,
    ItemFilter, QueueItem, Result, ScheduledTick, TickId, TickPayload, TrackingEvent,
};

/// Durable storage behind the delivery subsystem.
///
/// Methods that check-then-write (`claim_item`, `replace_item`,
/// `dead_letter`, `insert_tracking`, `fire_tracking`, `swap_campaign`,
/// `take_due_ticks`) must be atomic with respect to each other: two callers
/// racing on the same row must never both observe success.
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Insert a new item. Fails with `AlreadyExists` on an id collision.
    async fn insert_item(&self, item: &QueueItem) -> Result<()>;

    async fn get_item(&self, id: &QueueItemId) -> Result<Option<QueueItem>>;

    /// Items matching the filter, oldest id first.
    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<QueueItem>>;

    /// Pending items scheduled at or before `now`, highest priority first,
    /// then earliest `scheduled_at`, then id.
    async fn due_items(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueueItem>>;

    /// Move a pending item to processing. `false` when the item is gone or
    /// no longer pending.
    async fn claim_item(&self, id: &QueueItemId, now: DateTime<Utc>) -> Result<bool>;

    /// Overwrite an item if its current status is one of `expected`
    /// (any status when `expected` is empty). `false` when the guard fails
    /// or the item is missing.
    async fn replace_item(&self, item: &QueueItem, expected: &[QueueStatus]) -> Result<bool>;

    /// Return processing items not touched since `cutoff` to pending.
    async fn release_stuck(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItemId>>;

    /// Delete items in `status` whose `updated_at` is before `older_than`.
    async fn purge_items(&self, status: QueueStatus, older_than: DateTime<Utc>) -> Result<usize>;

    /// Insert the record and remove the live item in one step.
    /// `false` when the item no longer exists.
    async fn dead_letter(&self, record: &DeadLetterRecord) -> Result<bool>;

    /// Most recently dead-lettered first.
    async fn list_dead_letters(&self, limit: Option<usize>) -> Result<Vec<DeadLetterRecord>>;

    /// Remove and return a dead letter, for requeueing.
    async fn take_dead_letter(&self, id: &QueueItemId) -> Result<Option<DeadLetterRecord>>;

    async fn purge_dead_letters(&self, older_than: DateTime<Utc>) -> Result<usize>;

    /// Insert a tracking row unless one already carries the identifier.
    async fn insert_tracking(&self, event: &TrackingEvent) -> Result<bool>;

    async fn get_tracking(&self, id: &str) -> Result<Option<TrackingEvent>>;

    /// Flip a tracking row to fired, at most once.
    async fn fire_tracking(&self, id: &str, now: DateTime<Utc>) -> Result<FireOutcome>;

    async fn purge_tracking(&self, older_than: DateTime<Utc>) -> Result<usize>;

    async fn append_delivery_log(&self, entry: &DeliveryLogEntry) -> Result<()>;

    /// Log entries for one recipient in the order they were written.
    async fn delivery_log_for_recipient(
        &self,
        recipient_id: RecipientId,
    ) -> Result<Vec<DeliveryLogEntry>>;

    async fn delivery_log_for_content(&self, content_id: ContentId)
    -> Result<Vec<DeliveryLogEntry>>;

    /// Number of `sent` log entries written at or after `since`.
    async fn count_sent_since(&self, since: DateTime<Utc>) -> Result<usize>;

    async fn purge_delivery_log(&self, older_than: DateTime<Utc>) -> Result<usize>;

    /// Store a bounce and return the recipient's hard bounce total.
    async fn record_bounce(&self, bounce: &BounceRecord) -> Result<usize>;

    async fn bounces_for(&self, recipient_id: RecipientId) -> Result<Vec<BounceRecord>>;

    /// Persist a new campaign, assigning its id.
    async fn insert_campaign(&self, run: &CampaignRun) -> Result<CampaignId>;

    async fn get_campaign(&self, id: CampaignId) -> Result<Option<CampaignRun>>;

    async fn list_campaigns(&self) -> Result<Vec<CampaignRun>>;

    /// Unconditional overwrite. `false` when the campaign does not exist.
    async fn put_campaign(&self, run: &CampaignRun) -> Result<bool>;

    /// Overwrite only if the stored token and offset still match `guard`.
    async fn swap_campaign(&self, run: &CampaignRun, guard: CampaignGuard<'_>) -> Result<bool>;

    async fn schedule_tick(&self, due_at: DateTime<Utc>, payload: TickPayload) -> Result<TickId>;

    /// Remove and return ticks due at or before `now`, earliest first.
    async fn take_due_ticks(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledTick>>;

    /// Remove every tick whose payload equals `payload`.
    async fn cancel_ticks(&self, payload: &TickPayload) -> Result<usize>;

    async fn list_ticks(&self) -> Result<Vec<ScheduledTick>>;

    /// Make all writes so far durable. A no-op for purely in-memory stores.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
