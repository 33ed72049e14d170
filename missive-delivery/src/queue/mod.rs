//! The email queue.
//!
//! [`EmailQueue`] owns every queue item state change. It wraps the backing
//! store with validation, retry and dead-letter policy, audit events and
//! metrics. All conditional transitions are single guarded store calls, so
//! two workers can never both move the same item.

pub mod cleanup;
pub mod health;
pub mod retry;

use std::{str::FromStr, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use missive_common::{
    CampaignId, Clock, ContentId, QueueItemId, QueueStatus, RecipientId, TemplateKind, audit,
    clock::saturating_sub, internal,
};
use missive_store::{BackingStore, DeadLetterRecord, ItemFilter, QueueItem};

pub use cleanup::{CleanupReport, RetentionPolicy};
pub use health::QueueHealth;

use crate::{DeliveryError, ValidationError, flags::ControlFlags, policy::RetryPolicy};

pub const DEFAULT_PRIORITY: u8 = 5;
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// A job to add to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub recipient_id: RecipientId,
    pub template_kind: TemplateKind,
    pub subject: String,
    pub body: String,
    /// Defaults to now
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Defaults to [`DEFAULT_PRIORITY`]
    pub priority: Option<u8>,
    pub related_content_id: Option<ContentId>,
    pub bundled_content_ids: Vec<ContentId>,
    pub campaign_id: Option<CampaignId>,
}

impl EnqueueRequest {
    pub fn new(
        recipient_id: RecipientId,
        template_kind: TemplateKind,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id,
            template_kind,
            subject: subject.into(),
            body: body.into(),
            scheduled_at: None,
            priority: None,
            related_content_id: None,
            bundled_content_ids: Vec::new(),
            campaign_id: None,
        }
    }

    /// Build a request from untyped input, as received from the control
    /// socket.
    ///
    /// # Errors
    ///
    /// Rejects unknown template kinds.
    pub fn parse(
        recipient_id: u64,
        template_kind: &str,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let kind = TemplateKind::from_str(template_kind)?;
        Ok(Self::new(RecipientId(recipient_id), kind, subject, body))
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub const fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    #[must_use]
    pub const fn related_to(mut self, content: ContentId) -> Self {
        self.related_content_id = Some(content);
        self
    }

    #[must_use]
    pub fn bundling(mut self, content: Vec<ContentId>) -> Self {
        self.bundled_content_ids = content;
        self
    }

    #[must_use]
    pub const fn for_campaign(mut self, campaign: CampaignId) -> Self {
        self.campaign_id = Some(campaign);
        self
    }

    fn validate(&self) -> Result<u8, ValidationError> {
        if !self.recipient_id.is_valid() {
            return Err(ValidationError::InvalidRecipient(self.recipient_id.get()));
        }

        let priority = self.priority.unwrap_or(DEFAULT_PRIORITY);
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(ValidationError::PriorityOutOfRange(priority));
        }

        if self.subject.trim().is_empty() {
            return Err(ValidationError::EmptySubject);
        }

        Ok(priority)
    }
}

/// What `mark_failed` did with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Rescheduled {
        attempts: u32,
        retry_at: DateTime<Utc>,
    },
    DeadLettered {
        attempts: u32,
    },
    /// The item was gone or already in a terminal state.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct EmailQueue {
    store: Arc<dyn BackingStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    flags: Arc<ControlFlags>,
}

impl EmailQueue {
    pub fn new(
        store: Arc<dyn BackingStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        flags: Arc<ControlFlags>,
    ) -> Self {
        Self {
            store,
            clock,
            retry,
            flags,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[must_use]
    pub const fn flags(&self) -> &Arc<ControlFlags> {
        &self.flags
    }

    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate and persist a new pending job.
    ///
    /// # Errors
    ///
    /// Validation errors for a bad request, store errors otherwise.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<QueueItemId, DeliveryError> {
        let priority = request.validate()?;
        let now = self.now();

        let item = QueueItem {
            id: QueueItemId::generate(),
            recipient_id: request.recipient_id,
            related_content_id: request.related_content_id,
            bundled_content_ids: request.bundled_content_ids,
            campaign_id: request.campaign_id,
            template_kind: request.template_kind,
            subject: request.subject,
            body: request.body,
            status: QueueStatus::Pending,
            priority,
            attempts: 0,
            scheduled_at: request.scheduled_at.unwrap_or(now),
            created_at: now,
            updated_at: now,
            sent_at: None,
            error_log: None,
        };

        self.store.insert_item(&item).await?;

        audit::log_enqueued(
            &item.id.to_string(),
            item.recipient_id.get(),
            item.template_kind.as_str(),
            priority,
        );
        if let Some(metrics) = missive_metrics::try_metrics() {
            metrics.queue.record_enqueued(item.template_kind.as_str());
        }

        Ok(item.id)
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>, DeliveryError> {
        Ok(self.store.get_item(id).await?)
    }

    /// Due pending items, highest priority then oldest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn fetch_due(&self, limit: usize) -> Result<Vec<QueueItem>, DeliveryError> {
        Ok(self.store.due_items(self.now(), limit).await?)
    }

    /// Atomically move a pending item to processing.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn claim(&self, id: &QueueItemId) -> Result<bool, DeliveryError> {
        Ok(self.store.claim_item(id, self.now()).await?)
    }

    /// Mark a processing item as sent. `false` if it was no longer processing.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn mark_sent(&self, id: &QueueItemId) -> Result<bool, DeliveryError> {
        let Some(mut item) = self.store.get_item(id).await? else {
            return Ok(false);
        };

        let now = self.now();
        item.status = QueueStatus::Sent;
        item.attempts = item.attempts.saturating_add(1);
        item.sent_at = Some(now);
        item.updated_at = now;
        item.error_log = None;

        let updated = self
            .store
            .replace_item(&item, &[QueueStatus::Processing])
            .await?;

        if updated && let Some(metrics) = missive_metrics::try_metrics() {
            metrics.queue.record_sent(item.template_kind.as_str());
        }

        Ok(updated)
    }

    /// Record a failed attempt.
    ///
    /// Below the attempt ceiling the item goes back to pending with a
    /// backoff delay. At the ceiling it is written as `failed` and then moved
    /// to the dead-letter table in one store call. If that move fails the item
    /// stays `failed` and can be retried by an operator.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn mark_failed(
        &self,
        id: &QueueItemId,
        reason: &str,
    ) -> Result<FailureOutcome, DeliveryError> {
        let Some(mut item) = self.store.get_item(id).await? else {
            return Ok(FailureOutcome::Skipped);
        };

        let live = [QueueStatus::Processing, QueueStatus::Pending];
        if !live.contains(&item.status) {
            return Ok(FailureOutcome::Skipped);
        }

        let now = self.now();
        item.attempts = item.attempts.saturating_add(1);
        item.error_log = Some(reason.to_string());
        item.updated_at = now;

        if self.retry.should_retry(item.attempts) {
            let retry_at = self.retry.next_attempt_at(now, item.attempts);
            item.status = QueueStatus::Pending;
            item.scheduled_at = retry_at;

            if !self.store.replace_item(&item, &live).await? {
                return Ok(FailureOutcome::Skipped);
            }

            audit::log_send_failure(
                &item.id.to_string(),
                reason,
                item.attempts,
                &retry_at.to_rfc3339(),
            );
            if let Some(metrics) = missive_metrics::try_metrics() {
                metrics.queue.record_retry(item.attempts);
            }

            return Ok(FailureOutcome::Rescheduled {
                attempts: item.attempts,
                retry_at,
            });
        }

        item.status = QueueStatus::Failed;
        if !self.store.replace_item(&item, &live).await? {
            return Ok(FailureOutcome::Skipped);
        }

        let record = DeadLetterRecord::from_item(&item, reason, now);
        if !self.store.dead_letter(&record).await? {
            return Ok(FailureOutcome::Skipped);
        }

        audit::log_dead_lettered(
            &item.id.to_string(),
            item.recipient_id.get(),
            reason,
            item.attempts,
        );
        if let Some(metrics) = missive_metrics::try_metrics() {
            metrics.queue.record_dead_lettered();
        }

        Ok(FailureOutcome::DeadLettered {
            attempts: item.attempts,
        })
    }

    /// Cancel a pending or processing item. `false` when it was already
    /// terminal or missing.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn mark_cancelled(
        &self,
        id: &QueueItemId,
        reason: &str,
    ) -> Result<bool, DeliveryError> {
        let Some(mut item) = self.store.get_item(id).await? else {
            return Ok(false);
        };

        item.status = QueueStatus::Cancelled;
        item.error_log = Some(reason.to_string());
        item.updated_at = self.now();

        let cancelled = self
            .store
            .replace_item(&item, &[QueueStatus::Pending, QueueStatus::Processing])
            .await?;

        if cancelled && let Some(metrics) = missive_metrics::try_metrics() {
            metrics.queue.record_cancelled(reason);
        }

        Ok(cancelled)
    }

    /// Return items stuck in processing for longer than `timeout` to pending.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn recover_stuck(&self, timeout: Duration) -> Result<usize, DeliveryError> {
        let now = self.now();
        let released = self.store.release_stuck(saturating_sub(now, timeout), now).await?;

        for id in &released {
            internal!(level = WARN, "Recovered stuck item {id}");
        }

        Ok(released.len())
    }

    pub fn pause(&self) {
        self.flags.set_paused(true);
        internal!(level = INFO, "Queue paused");
    }

    pub fn resume(&self) {
        self.flags.set_paused(false);
        internal!(level = INFO, "Queue resumed");
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.flags.is_paused()
    }

    /// Reset every failed item and requeue every dead letter.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn retry_all_failed(&self) -> Result<usize, DeliveryError> {
        let mut retried = 0;

        for item in self
            .store
            .list_items(&ItemFilter::with_status(QueueStatus::Failed))
            .await?
        {
            if self.reset_failed(item).await? {
                retried += 1;
            }
        }

        for record in self.store.list_dead_letters(None).await? {
            if self.requeue_dead_letter(&record.item_id).await?.is_some() {
                retried += 1;
            }
        }

        internal!(level = INFO, "Retried {retried} failed items");
        Ok(retried)
    }

    /// Retry the given ids, whether they are failed items or dead letters.
    /// Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn retry_selected(&self, ids: &[QueueItemId]) -> Result<usize, DeliveryError> {
        let mut retried = 0;

        for id in ids {
            let done = match self.store.get_item(id).await? {
                Some(item) if item.status == QueueStatus::Failed => self.reset_failed(item).await?,
                Some(_) => false,
                None => self.requeue_dead_letter(id).await?.is_some(),
            };

            if done {
                retried += 1;
            }
        }

        Ok(retried)
    }

    async fn reset_failed(&self, mut item: QueueItem) -> Result<bool, DeliveryError> {
        let now = self.now();
        item.status = QueueStatus::Pending;
        item.attempts = 0;
        item.scheduled_at = now;
        item.updated_at = now;

        Ok(self
            .store
            .replace_item(&item, &[QueueStatus::Failed])
            .await?)
    }

    /// Move a dead letter back into the queue as a fresh pending item.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn requeue_dead_letter(
        &self,
        id: &QueueItemId,
    ) -> Result<Option<QueueItemId>, DeliveryError> {
        let Some(record) = self.store.take_dead_letter(id).await? else {
            return Ok(None);
        };

        let mut request = EnqueueRequest::new(
            record.recipient_id,
            record.template_kind,
            record.subject,
            record.body,
        )
        .with_priority(record.priority)
        .bundling(record.bundled_content_ids);
        request.related_content_id = record.related_content_id;
        request.campaign_id = record.campaign_id;

        let new_id = self.enqueue(request).await?;
        internal!(level = INFO, "Requeued dead letter {id} as {new_id}");

        Ok(Some(new_id))
    }

    /// Cancel every pending item belonging to a campaign.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn cancel_campaign(
        &self,
        campaign_id: CampaignId,
        reason: &str,
    ) -> Result<usize, DeliveryError> {
        let filter = ItemFilter {
            statuses: vec![QueueStatus::Pending],
            campaign_id: Some(campaign_id),
            ..ItemFilter::default()
        };

        let mut cancelled = 0;
        for item in self.store.list_items(&filter).await? {
            if self.mark_cancelled(&item.id, reason).await? {
                cancelled += 1;
            }
        }

        Ok(cancelled)
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list(&self, filter: &ItemFilter) -> Result<Vec<QueueItem>, DeliveryError> {
        Ok(self.store.list_items(filter).await?)
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn dead_letters(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<DeadLetterRecord>, DeliveryError> {
        Ok(self.store.list_dead_letters(limit).await?)
    }
}
