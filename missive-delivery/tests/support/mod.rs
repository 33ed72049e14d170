//! Shared fixtures for delivery integration tests
#![allow(dead_code)] // Test utility module - not all helpers used in every test

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use missive_common::{
    Cadence, CampaignId, ContentId, ManualClock, QueueItemId, QueueStatus, RecipientId,
    RecipientStatus,
};
use missive_delivery::{
    Collaborators, DispatchProcessor,
    content::ContentItem,
    directory::{MemoryContentSource, MemoryRecipientDirectory},
    recipient::Recipient,
    transport::MemoryTransport,
};
use missive_store::{
    BackingStore, BounceRecord, CampaignGuard, CampaignRun, DeadLetterRecord, DeliveryLogEntry,
    FireOutcome, ItemFilter, MemoryBackingStore, QueueItem, Result, ScheduledTick, StoreError,
    TickId, TickPayload, TrackingEvent,
};

pub struct World {
    pub processor: Arc<DispatchProcessor>,
    pub store: Arc<MemoryBackingStore>,
    /// The store the processor sees; wraps `store`
    pub flaky: Arc<FlakyStore>,
    pub directory: Arc<MemoryRecipientDirectory>,
    pub content: Arc<MemoryContentSource>,
    pub transport: Arc<MemoryTransport>,
    pub clock: ManualClock,
}

/// A fully wired processor over in-memory collaborators and a manual clock.
pub fn world(configure: impl FnOnce(&mut DispatchProcessor)) -> World {
    let store = Arc::new(MemoryBackingStore::new());
    let flaky = Arc::new(FlakyStore::new(store.clone()));
    let directory = Arc::new(MemoryRecipientDirectory::new());
    let content = Arc::new(MemoryContentSource::new());
    let transport = Arc::new(MemoryTransport::new());
    let clock = ManualClock::starting_now();

    let mut processor = DispatchProcessor::default();
    processor.tracking.secret = "integration-secret".to_string();
    configure(&mut processor);

    processor
        .init(Collaborators {
            store: flaky.clone(),
            recipients: directory.clone(),
            content: content.clone(),
            transport: transport.clone(),
            clock: Arc::new(clock.clone()),
        })
        .expect("processor initialises");

    World {
        processor: Arc::new(processor),
        store,
        flaky,
        directory,
        content,
        transport,
        clock,
    }
}

pub fn reader(id: u64) -> Recipient {
    Recipient {
        id: RecipientId(id),
        email: Some(format!("reader{id}@example.com")),
        secondary_email: None,
        display_name: Some(format!("Reader {id}")),
        status: RecipientStatus::Active,
        verified: true,
        frequency: Some(Cadence::Weekly),
        digest_opt_in: true,
        newsletter_opt_in: true,
        consent_confirmed: true,
    }
}

/// Letter `id`, published `id` hours after the epoch base so higher ids are
/// newer.
pub fn letter(id: u64, base: DateTime<Utc>) -> ContentItem {
    ContentItem {
        id: ContentId(id),
        title: format!("Letter {id}"),
        excerpt: format!("The {id} letter"),
        url: format!("https://letters.example/letters/{id}"),
        published_at: base + Duration::hours(i64::try_from(id).unwrap_or_default()),
    }
}

/// Identifiers of every tracking link of `kind` in `body`, in order.
pub fn tracking_ids(body: &str, kind: &str) -> Vec<String> {
    let marker = format!("?track={kind}&id=");
    body.match_indices(&marker)
        .map(|(at, _)| {
            body[at + marker.len()..]
                .chars()
                .take_while(char::is_ascii_hexdigit)
                .collect()
        })
        .collect()
}

/// Delegates to a memory store, failing the next few calls of selected
/// operations on request.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<MemoryBackingStore>,
    campaign_reads: AtomicUsize,
    tick_writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryBackingStore>) -> Self {
        Self {
            inner,
            campaign_reads: AtomicUsize::new(0),
            tick_writes: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` campaign lookups.
    pub fn fail_campaign_reads(&self, n: usize) {
        self.campaign_reads.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` tick schedules.
    pub fn fail_tick_writes(&self, n: usize) {
        self.tick_writes.store(n, Ordering::SeqCst);
    }

    fn trip(counter: &AtomicUsize, what: &str) -> Result<()> {
        if counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Internal(format!("injected {what} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl BackingStore for FlakyStore {
    async fn insert_item(&self, item: &QueueItem) -> Result<()> {
        self.inner.insert_item(item).await
    }

    async fn get_item(&self, id: &QueueItemId) -> Result<Option<QueueItem>> {
        self.inner.get_item(id).await
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<QueueItem>> {
        self.inner.list_items(filter).await
    }

    async fn due_items(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueueItem>> {
        self.inner.due_items(now, limit).await
    }

    async fn claim_item(&self, id: &QueueItemId, now: DateTime<Utc>) -> Result<bool> {
        self.inner.claim_item(id, now).await
    }

    async fn replace_item(&self, item: &QueueItem, expected: &[QueueStatus]) -> Result<bool> {
        self.inner.replace_item(item, expected).await
    }

    async fn release_stuck(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItemId>> {
        self.inner.release_stuck(cutoff, now).await
    }

    async fn purge_items(&self, status: QueueStatus, older_than: DateTime<Utc>) -> Result<usize> {
        self.inner.purge_items(status, older_than).await
    }

    async fn dead_letter(&self, record: &DeadLetterRecord) -> Result<bool> {
        self.inner.dead_letter(record).await
    }

    async fn list_dead_letters(&self, limit: Option<usize>) -> Result<Vec<DeadLetterRecord>> {
        self.inner.list_dead_letters(limit).await
    }

    async fn take_dead_letter(&self, id: &QueueItemId) -> Result<Option<DeadLetterRecord>> {
        self.inner.take_dead_letter(id).await
    }

    async fn purge_dead_letters(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.inner.purge_dead_letters(older_than).await
    }

    async fn insert_tracking(&self, event: &TrackingEvent) -> Result<bool> {
        self.inner.insert_tracking(event).await
    }

    async fn get_tracking(&self, id: &str) -> Result<Option<TrackingEvent>> {
        self.inner.get_tracking(id).await
    }

    async fn fire_tracking(&self, id: &str, now: DateTime<Utc>) -> Result<FireOutcome> {
        self.inner.fire_tracking(id, now).await
    }

    async fn purge_tracking(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.inner.purge_tracking(older_than).await
    }

    async fn append_delivery_log(&self, entry: &DeliveryLogEntry) -> Result<()> {
        self.inner.append_delivery_log(entry).await
    }

    async fn delivery_log_for_recipient(
        &self,
        recipient_id: RecipientId,
    ) -> Result<Vec<DeliveryLogEntry>> {
        self.inner.delivery_log_for_recipient(recipient_id).await
    }

    async fn delivery_log_for_content(
        &self,
        content_id: ContentId,
    ) -> Result<Vec<DeliveryLogEntry>> {
        self.inner.delivery_log_for_content(content_id).await
    }

    async fn count_sent_since(&self, since: DateTime<Utc>) -> Result<usize> {
        self.inner.count_sent_since(since).await
    }

    async fn purge_delivery_log(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.inner.purge_delivery_log(older_than).await
    }

    async fn record_bounce(&self, bounce: &BounceRecord) -> Result<usize> {
        self.inner.record_bounce(bounce).await
    }

    async fn bounces_for(&self, recipient_id: RecipientId) -> Result<Vec<BounceRecord>> {
        self.inner.bounces_for(recipient_id).await
    }

    async fn insert_campaign(&self, run: &CampaignRun) -> Result<CampaignId> {
        self.inner.insert_campaign(run).await
    }

    async fn get_campaign(&self, id: CampaignId) -> Result<Option<CampaignRun>> {
        Self::trip(&self.campaign_reads, "campaign read")?;
        self.inner.get_campaign(id).await
    }

    async fn list_campaigns(&self) -> Result<Vec<CampaignRun>> {
        self.inner.list_campaigns().await
    }

    async fn put_campaign(&self, run: &CampaignRun) -> Result<bool> {
        self.inner.put_campaign(run).await
    }

    async fn swap_campaign(&self, run: &CampaignRun, guard: CampaignGuard<'_>) -> Result<bool> {
        self.inner.swap_campaign(run, guard).await
    }

    async fn schedule_tick(&self, due_at: DateTime<Utc>, payload: TickPayload) -> Result<TickId> {
        Self::trip(&self.tick_writes, "tick write")?;
        self.inner.schedule_tick(due_at, payload).await
    }

    async fn take_due_ticks(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledTick>> {
        self.inner.take_due_ticks(now, limit).await
    }

    async fn cancel_ticks(&self, payload: &TickPayload) -> Result<usize> {
        self.inner.cancel_ticks(payload).await
    }

    async fn list_ticks(&self) -> Result<Vec<ScheduledTick>> {
        self.inner.list_ticks().await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}
