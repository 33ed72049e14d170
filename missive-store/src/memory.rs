use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use missive_common::{CampaignId, ContentId, QueueItemId, QueueStatus, RecipientId};
use serde::{Deserialize, Serialize};

use crate::{
    BackingStore, BounceKind, BounceRecord, CampaignGuard, CampaignRun, DeadLetterRecord,
    DeliveryLogEntry, DeliveryOutcome, FireOutcome, ItemFilter, QueueItem, ScheduledTick,
    StoreError, TickId, TickPayload, TrackingEvent, snapshot,
};

/// Every table the store keeps, serialised as one unit for snapshots.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct Tables {
    pub(crate) items: HashMap<QueueItemId, QueueItem>,
    pub(crate) dead_letters: HashMap<QueueItemId, DeadLetterRecord>,
    pub(crate) tracking: HashMap<String, TrackingEvent>,
    pub(crate) delivery_log: Vec<DeliveryLogEntry>,
    pub(crate) bounces: Vec<BounceRecord>,
    pub(crate) campaigns: HashMap<CampaignId, CampaignRun>,
    pub(crate) ticks: HashMap<TickId, ScheduledTick>,
    pub(crate) next_campaign_id: u64,
    pub(crate) next_tick_id: u64,
}

/// In-memory backing store
///
/// All tables live behind a single `RwLock`, so every conditional update
/// (claim, guarded replace, dead-letter move, tracking fire, campaign swap,
/// tick take) runs under one write guard and is atomic with respect to every
/// other operation.
///
/// With a snapshot path configured, [`BackingStore::flush`] serialises the
/// tables with bincode to a temporary file and renames it into place, and
/// [`MemoryBackingStore::open`] restores them at startup.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackingStore {
    pub(crate) tables: Arc<RwLock<Tables>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryBackingStore {
    /// Create a new empty store with no persistence
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store persisted at `path`, restoring the previous snapshot if
    /// one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or decoded.
    pub async fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let tables = snapshot::load(&path).await?.unwrap_or_default();

        tracing::info!(
            path = %path.display(),
            items = tables.items.len(),
            dead_letters = tables.dead_letters.len(),
            campaigns = tables.campaigns.len(),
            "Opened snapshot-backed store"
        );

        Ok(Self {
            tables: Arc::new(RwLock::new(tables)),
            snapshot_path: Some(path),
        })
    }

    #[must_use]
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Number of live queue items.
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .items
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sort_for_dispatch(items: &mut [QueueItem]) {
    items.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.scheduled_at.cmp(&b.scheduled_at))
            .then(a.id.cmp(&b.id))
    });
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn insert_item(&self, item: &QueueItem) -> crate::Result<()> {
        let mut tables = self.tables.write()?;
        if tables.items.contains_key(&item.id) {
            return Err(StoreError::AlreadyExists(item.id));
        }
        tables.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_item(&self, id: &QueueItemId) -> crate::Result<Option<QueueItem>> {
        Ok(self.tables.read()?.items.get(id).cloned())
    }

    async fn list_items(&self, filter: &ItemFilter) -> crate::Result<Vec<QueueItem>> {
        let mut items: Vec<_> = self
            .tables
            .read()?
            .items
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();

        // ULIDs are lexicographically sortable by creation time
        items.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = filter.limit {
            items.truncate(limit);
        }

        Ok(items)
    }

    async fn due_items(&self, now: DateTime<Utc>, limit: usize) -> crate::Result<Vec<QueueItem>> {
        let mut due: Vec<_> = self
            .tables
            .read()?
            .items
            .values()
            .filter(|item| item.is_due(now))
            .cloned()
            .collect();

        sort_for_dispatch(&mut due);
        due.truncate(limit);

        Ok(due)
    }

    async fn claim_item(&self, id: &QueueItemId, now: DateTime<Utc>) -> crate::Result<bool> {
        let mut tables = self.tables.write()?;
        match tables.items.get_mut(id) {
            Some(item) if item.status == QueueStatus::Pending => {
                item.status = QueueStatus::Processing;
                item.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn replace_item(
        &self,
        item: &QueueItem,
        expected: &[QueueStatus],
    ) -> crate::Result<bool> {
        let mut tables = self.tables.write()?;
        match tables.items.get_mut(&item.id) {
            Some(current) if expected.is_empty() || expected.contains(&current.status) => {
                *current = item.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_stuck(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> crate::Result<Vec<QueueItemId>> {
        let mut tables = self.tables.write()?;
        let mut released = Vec::new();

        for item in tables.items.values_mut() {
            if item.status == QueueStatus::Processing && item.updated_at < cutoff {
                item.status = QueueStatus::Pending;
                item.updated_at = now;
                released.push(item.id);
            }
        }

        released.sort();
        Ok(released)
    }

    async fn purge_items(
        &self,
        status: QueueStatus,
        older_than: DateTime<Utc>,
    ) -> crate::Result<usize> {
        let mut tables = self.tables.write()?;
        let before = tables.items.len();
        tables
            .items
            .retain(|_, item| !(item.status == status && item.updated_at < older_than));
        Ok(before - tables.items.len())
    }

    async fn dead_letter(&self, record: &DeadLetterRecord) -> crate::Result<bool> {
        let mut tables = self.tables.write()?;
        if tables.items.remove(&record.item_id).is_none() {
            return Ok(false);
        }
        tables.dead_letters.insert(record.item_id, record.clone());
        Ok(true)
    }

    async fn list_dead_letters(
        &self,
        limit: Option<usize>,
    ) -> crate::Result<Vec<DeadLetterRecord>> {
        let mut records: Vec<_> = self.tables.read()?.dead_letters.values().cloned().collect();

        records.sort_by(|a, b| {
            b.dead_lettered_at
                .cmp(&a.dead_lettered_at)
                .then(b.item_id.cmp(&a.item_id))
        });
        if let Some(limit) = limit {
            records.truncate(limit);
        }

        Ok(records)
    }

    async fn take_dead_letter(&self, id: &QueueItemId) -> crate::Result<Option<DeadLetterRecord>> {
        Ok(self.tables.write()?.dead_letters.remove(id))
    }

    async fn purge_dead_letters(&self, older_than: DateTime<Utc>) -> crate::Result<usize> {
        let mut tables = self.tables.write()?;
        let before = tables.dead_letters.len();
        tables
            .dead_letters
            .retain(|_, record| record.dead_lettered_at >= older_than);
        Ok(before - tables.dead_letters.len())
    }

    async fn insert_tracking(&self, event: &TrackingEvent) -> crate::Result<bool> {
        let mut tables = self.tables.write()?;
        if tables.tracking.contains_key(&event.id) {
            return Ok(false);
        }
        tables.tracking.insert(event.id.clone(), event.clone());
        Ok(true)
    }

    async fn get_tracking(&self, id: &str) -> crate::Result<Option<TrackingEvent>> {
        Ok(self.tables.read()?.tracking.get(id).cloned())
    }

    async fn fire_tracking(&self, id: &str, now: DateTime<Utc>) -> crate::Result<FireOutcome> {
        let mut tables = self.tables.write()?;
        let Some(event) = tables.tracking.get_mut(id) else {
            return Ok(FireOutcome::Unknown);
        };

        if event.fired {
            return Ok(FireOutcome::Repeat(event.clone()));
        }

        event.fired = true;
        event.fired_at = Some(now);
        Ok(FireOutcome::First(event.clone()))
    }

    async fn purge_tracking(&self, older_than: DateTime<Utc>) -> crate::Result<usize> {
        let mut tables = self.tables.write()?;
        let before = tables.tracking.len();
        tables
            .tracking
            .retain(|_, event| event.created_at >= older_than);
        Ok(before - tables.tracking.len())
    }

    async fn append_delivery_log(&self, entry: &DeliveryLogEntry) -> crate::Result<()> {
        self.tables.write()?.delivery_log.push(entry.clone());
        Ok(())
    }

    async fn delivery_log_for_recipient(
        &self,
        recipient_id: RecipientId,
    ) -> crate::Result<Vec<DeliveryLogEntry>> {
        Ok(self
            .tables
            .read()?
            .delivery_log
            .iter()
            .filter(|entry| entry.recipient_id == recipient_id)
            .cloned()
            .collect())
    }

    async fn delivery_log_for_content(
        &self,
        content_id: ContentId,
    ) -> crate::Result<Vec<DeliveryLogEntry>> {
        Ok(self
            .tables
            .read()?
            .delivery_log
            .iter()
            .filter(|entry| entry.content_ids.contains(&content_id))
            .cloned()
            .collect())
    }

    async fn count_sent_since(&self, since: DateTime<Utc>) -> crate::Result<usize> {
        Ok(self
            .tables
            .read()?
            .delivery_log
            .iter()
            .filter(|entry| entry.outcome == DeliveryOutcome::Sent && entry.logged_at >= since)
            .count())
    }

    async fn purge_delivery_log(&self, older_than: DateTime<Utc>) -> crate::Result<usize> {
        let mut tables = self.tables.write()?;
        let before = tables.delivery_log.len();
        tables
            .delivery_log
            .retain(|entry| entry.logged_at >= older_than);
        Ok(before - tables.delivery_log.len())
    }

    async fn record_bounce(&self, bounce: &BounceRecord) -> crate::Result<usize> {
        let mut tables = self.tables.write()?;
        tables.bounces.push(bounce.clone());
        Ok(tables
            .bounces
            .iter()
            .filter(|b| b.recipient_id == bounce.recipient_id && b.kind == BounceKind::Hard)
            .count())
    }

    async fn bounces_for(&self, recipient_id: RecipientId) -> crate::Result<Vec<BounceRecord>> {
        Ok(self
            .tables
            .read()?
            .bounces
            .iter()
            .filter(|b| b.recipient_id == recipient_id)
            .cloned()
            .collect())
    }

    async fn insert_campaign(&self, run: &CampaignRun) -> crate::Result<CampaignId> {
        let mut tables = self.tables.write()?;
        tables.next_campaign_id += 1;
        let id = CampaignId(tables.next_campaign_id);

        let mut run = run.clone();
        run.id = id;
        tables.campaigns.insert(id, run);

        Ok(id)
    }

    async fn get_campaign(&self, id: CampaignId) -> crate::Result<Option<CampaignRun>> {
        Ok(self.tables.read()?.campaigns.get(&id).cloned())
    }

    async fn list_campaigns(&self) -> crate::Result<Vec<CampaignRun>> {
        let mut runs: Vec<_> = self.tables.read()?.campaigns.values().cloned().collect();
        runs.sort_by_key(|run| run.id);
        Ok(runs)
    }

    async fn put_campaign(&self, run: &CampaignRun) -> crate::Result<bool> {
        let mut tables = self.tables.write()?;
        match tables.campaigns.get_mut(&run.id) {
            Some(current) => {
                *current = run.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn swap_campaign(
        &self,
        run: &CampaignRun,
        guard: CampaignGuard<'_>,
    ) -> crate::Result<bool> {
        let mut tables = self.tables.write()?;
        match tables.campaigns.get_mut(&run.id) {
            Some(current)
                if current.token.as_deref() == Some(guard.token)
                    && current.next_offset == guard.offset =>
            {
                *current = run.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn schedule_tick(
        &self,
        due_at: DateTime<Utc>,
        payload: TickPayload,
    ) -> crate::Result<TickId> {
        let mut tables = self.tables.write()?;
        tables.next_tick_id += 1;
        let id = TickId(tables.next_tick_id);
        tables.ticks.insert(
            id,
            ScheduledTick {
                id,
                due_at,
                payload,
            },
        );
        Ok(id)
    }

    async fn take_due_ticks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> crate::Result<Vec<ScheduledTick>> {
        let mut tables = self.tables.write()?;

        let mut due: Vec<_> = tables
            .ticks
            .values()
            .filter(|tick| tick.due_at <= now)
            .map(|tick| (tick.due_at, tick.id))
            .collect();
        due.sort();
        due.truncate(limit);

        Ok(due
            .into_iter()
            .filter_map(|(_, id)| tables.ticks.remove(&id))
            .collect())
    }

    async fn cancel_ticks(&self, payload: &TickPayload) -> crate::Result<usize> {
        let mut tables = self.tables.write()?;
        let before = tables.ticks.len();
        tables.ticks.retain(|_, tick| &tick.payload != payload);
        Ok(before - tables.ticks.len())
    }

    async fn list_ticks(&self) -> crate::Result<Vec<ScheduledTick>> {
        let mut ticks: Vec<_> = self.tables.read()?.ticks.values().cloned().collect();
        ticks.sort_by_key(|tick| (tick.due_at, tick.id));
        Ok(ticks)
    }

    async fn flush(&self) -> crate::Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let bytes = {
            let tables = self.tables.read()?;
            snapshot::encode(&tables)?
        };
        snapshot::write_atomic(path, &bytes).await
    }
}
