//! Service trait abstraction for queue administration
//!
//! Decouples control interfaces (the control socket handler, tests) from
//! the concrete [`DispatchProcessor`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use missive_common::{Cadence, CampaignId, QueueItemId};
use missive_store::{CampaignRun, DeadLetterRecord, ItemFilter, QueueItem};

use crate::{
    DeliveryError,
    campaign::NewCampaign,
    flags::{Flag, FlagState},
    processor::{DispatchProcessor, TickReport},
    queue::{CleanupReport, EnqueueRequest, QueueHealth},
};

/// Administrative operations on the delivery subsystem.
#[async_trait]
pub trait QueueAdmin: Send + Sync {
    fn pause(&self);

    fn resume(&self);

    fn flag_state(&self) -> FlagState;

    fn set_flag(&self, flag: Flag, value: bool);

    async fn enqueue(&self, request: EnqueueRequest) -> Result<QueueItemId, DeliveryError>;

    /// Failed items back to pending and dead letters requeued.
    async fn retry_all_failed(&self) -> Result<usize, DeliveryError>;

    async fn retry_selected(&self, ids: &[QueueItemId]) -> Result<usize, DeliveryError>;

    async fn cancel_item(&self, id: &QueueItemId) -> Result<bool, DeliveryError>;

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<QueueItem>, DeliveryError>;

    async fn list_dead_letters(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<DeadLetterRecord>, DeliveryError>;

    async fn queue_health(&self) -> Result<QueueHealth, DeliveryError>;

    async fn run_tick_now(&self) -> Result<TickReport, DeliveryError>;

    async fn cleanup_now(&self) -> Result<CleanupReport, DeliveryError>;

    async fn create_campaign(&self, campaign: NewCampaign) -> Result<CampaignId, DeliveryError>;

    async fn start_campaign(&self, id: CampaignId, resume: bool) -> Result<(), DeliveryError>;

    async fn schedule_campaign(
        &self,
        id: CampaignId,
        at: DateTime<Utc>,
    ) -> Result<(), DeliveryError>;

    async fn stop_campaign(&self, id: CampaignId) -> Result<(), DeliveryError>;

    /// Stop the campaign and cancel its pending items.
    async fn cancel_campaign(&self, id: CampaignId) -> Result<usize, DeliveryError>;

    async fn list_campaigns(&self) -> Result<Vec<CampaignRun>, DeliveryError>;

    /// Begin a digest run, returning its id.
    async fn start_digest(&self, cadence: Cadence) -> Result<String, DeliveryError>;
}

#[async_trait]
impl QueueAdmin for DispatchProcessor {
    fn pause(&self) {
        self.flags().set_paused(true);
    }

    fn resume(&self) {
        self.flags().set_paused(false);
    }

    fn flag_state(&self) -> FlagState {
        self.flags().state()
    }

    fn set_flag(&self, flag: Flag, value: bool) {
        self.flags().set(flag, value);
    }

    async fn enqueue(&self, request: EnqueueRequest) -> Result<QueueItemId, DeliveryError> {
        self.queue()?.enqueue(request).await
    }

    async fn retry_all_failed(&self) -> Result<usize, DeliveryError> {
        self.queue()?.retry_all_failed().await
    }

    async fn retry_selected(&self, ids: &[QueueItemId]) -> Result<usize, DeliveryError> {
        self.queue()?.retry_selected(ids).await
    }

    async fn cancel_item(&self, id: &QueueItemId) -> Result<bool, DeliveryError> {
        self.queue()?.mark_cancelled(id, "cancelled by operator").await
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<QueueItem>, DeliveryError> {
        self.queue()?.list(filter).await
    }

    async fn list_dead_letters(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<DeadLetterRecord>, DeliveryError> {
        self.queue()?.dead_letters(limit).await
    }

    async fn queue_health(&self) -> Result<QueueHealth, DeliveryError> {
        self.queue()?.health(self.stuck_timeout()).await
    }

    async fn run_tick_now(&self) -> Result<TickReport, DeliveryError> {
        self.tick().await
    }

    async fn cleanup_now(&self) -> Result<CleanupReport, DeliveryError> {
        self.queue()?.cleanup(&self.retention).await
    }

    async fn create_campaign(&self, campaign: NewCampaign) -> Result<CampaignId, DeliveryError> {
        self.campaigns()?.create(campaign).await
    }

    async fn start_campaign(&self, id: CampaignId, resume: bool) -> Result<(), DeliveryError> {
        self.campaigns()?.start(id, resume).await
    }

    async fn schedule_campaign(
        &self,
        id: CampaignId,
        at: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        self.campaigns()?.schedule(id, at).await
    }

    async fn stop_campaign(&self, id: CampaignId) -> Result<(), DeliveryError> {
        self.campaigns()?.stop(id).await
    }

    async fn cancel_campaign(&self, id: CampaignId) -> Result<usize, DeliveryError> {
        self.campaigns()?.cancel(id).await
    }

    async fn list_campaigns(&self) -> Result<Vec<CampaignRun>, DeliveryError> {
        self.campaigns()?.list().await
    }

    async fn start_digest(&self, cadence: Cadence) -> Result<String, DeliveryError> {
        self.digests()?.start_run(cadence).await
    }
}
