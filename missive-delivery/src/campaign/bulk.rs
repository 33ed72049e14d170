//! Bulk newsletter campaigns.
//!
//! `start` mints a fresh token and schedules the first batch. Every batch
//! tick carries `(campaign, offset, token)` and only runs while the stored
//! campaign still holds that exact token and offset, so a stop or restart
//! silently retires whatever ticks were already queued.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use missive_common::{CampaignId, TemplateKind, internal};
use missive_store::{CampaignContent, CampaignGuard, CampaignRun, CampaignStatus, TickPayload};

use super::{CampaignConfig, token};
use crate::{
    DeliveryError,
    queue::{EmailQueue, EnqueueRequest},
    recipient::{RecipientDirectory, RecipientFilter},
    scheduler::TickScheduler,
    template::{Rendered, TemplateRegistry, personalize},
};

/// Input for [`CampaignOrchestrator::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCampaign {
    pub name: String,
    pub variant_a: CampaignContent,
    pub variant_b: Option<CampaignContent>,
    /// Defaults to the configured campaign priority
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Missing campaign, stale token or offset. Nothing happened.
    Ignored,
    Queued { queued: usize, next_offset: usize },
    /// No recipients were left; the campaign is now sent.
    Completed { total_queued: usize },
}

#[derive(Debug, Clone)]
pub struct CampaignOrchestrator {
    queue: EmailQueue,
    directory: Arc<dyn RecipientDirectory>,
    templates: Arc<TemplateRegistry>,
    scheduler: TickScheduler,
    config: CampaignConfig,
}

impl CampaignOrchestrator {
    pub fn new(
        queue: EmailQueue,
        directory: Arc<dyn RecipientDirectory>,
        templates: Arc<TemplateRegistry>,
        scheduler: TickScheduler,
        config: CampaignConfig,
    ) -> Self {
        Self {
            queue,
            directory,
            templates,
            scheduler,
            config,
        }
    }

    /// Persist a draft campaign.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn create(&self, campaign: NewCampaign) -> Result<CampaignId, DeliveryError> {
        let now = self.queue.clock().now();
        let run = CampaignRun {
            id: CampaignId(0),
            name: campaign.name,
            status: CampaignStatus::Draft,
            token: None,
            next_offset: 0,
            queued_count: 0,
            total_recipients: 0,
            variant_a: campaign.variant_a,
            variant_b: campaign.variant_b,
            priority: campaign.priority.unwrap_or(self.config.campaign_priority),
            scheduled_for: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let id = self.queue.store().insert_campaign(&run).await?;
        internal!(level = INFO, "Created campaign {id} ({})", run.name);
        Ok(id)
    }

    async fn load(&self, id: CampaignId) -> Result<CampaignRun, DeliveryError> {
        self.queue
            .store()
            .get_campaign(id)
            .await?
            .ok_or_else(|| DeliveryError::NotFound(format!("campaign {id}")))
    }

    /// Retire the tick chain the campaign currently holds, if any.
    async fn retire_ticks(&self, run: &CampaignRun) -> Result<(), DeliveryError> {
        if let Some(token) = &run.token {
            self.scheduler
                .cancel(&TickPayload::CampaignBatch {
                    campaign_id: run.id,
                    offset: run.next_offset,
                    token: token.clone(),
                })
                .await?;
        }
        Ok(())
    }

    /// Arm the campaign with a fresh token and recipient count.
    async fn arm(
        &self,
        id: CampaignId,
        status: CampaignStatus,
        resume: bool,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<CampaignRun, DeliveryError> {
        let mut run = self.load(id).await?;
        self.retire_ticks(&run).await?;

        if !resume {
            run.next_offset = 0;
            run.queued_count = 0;
        }
        run.status = status;
        run.token = Some(token::generate());
        run.total_recipients = self.directory.count(RecipientFilter::Newsletter).await?;
        run.scheduled_for = scheduled_for;
        run.completed_at = None;
        run.updated_at = self.queue.clock().now();

        self.queue.store().put_campaign(&run).await?;
        Ok(run)
    }

    fn first_tick(run: &CampaignRun) -> Option<TickPayload> {
        run.token.as_ref().map(|token| TickPayload::CampaignBatch {
            campaign_id: run.id,
            offset: run.next_offset,
            token: token.clone(),
        })
    }

    /// Begin sending now. With `resume` the persisted offset is kept.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown campaign, store failures otherwise.
    pub async fn start(&self, id: CampaignId, resume: bool) -> Result<(), DeliveryError> {
        let run = self.arm(id, CampaignStatus::Sending, resume, None).await?;
        if let Some(payload) = Self::first_tick(&run) {
            self.scheduler
                .schedule_in(chrono::Duration::zero(), payload)
                .await?;
        }

        internal!(
            level = INFO,
            "Campaign {id} sending to {} recipients from offset {}",
            run.total_recipients,
            run.next_offset
        );
        Ok(())
    }

    /// Arrange for the first batch to run at `at`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown campaign, store failures otherwise.
    pub async fn schedule(&self, id: CampaignId, at: DateTime<Utc>) -> Result<(), DeliveryError> {
        let run = self
            .arm(id, CampaignStatus::Scheduled, false, Some(at))
            .await?;
        if let Some(payload) = Self::first_tick(&run) {
            self.scheduler.schedule_at(at, payload).await?;
        }

        internal!(level = INFO, "Campaign {id} scheduled for {at}");
        Ok(())
    }

    /// Clear the token and mark the campaign stopped. Items already queued
    /// are left alone.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown campaign, store failures otherwise.
    pub async fn stop(&self, id: CampaignId) -> Result<(), DeliveryError> {
        let mut run = self.load(id).await?;
        self.retire_ticks(&run).await?;

        run.token = None;
        run.status = CampaignStatus::Stopped;
        run.updated_at = self.queue.clock().now();
        self.queue.store().put_campaign(&run).await?;

        internal!(level = INFO, "Campaign {id} stopped at offset {}", run.next_offset);
        Ok(())
    }

    /// Stop the campaign and cancel its queued items.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown campaign, store failures otherwise.
    pub async fn cancel(&self, id: CampaignId) -> Result<usize, DeliveryError> {
        self.stop(id).await?;
        self.queue.cancel_campaign(id, "campaign cancelled").await
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get(&self, id: CampaignId) -> Result<Option<CampaignRun>, DeliveryError> {
        Ok(self.queue.store().get_campaign(id).await?)
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list(&self) -> Result<Vec<CampaignRun>, DeliveryError> {
        Ok(self.queue.store().list_campaigns().await?)
    }

    /// The tick to put back after `payload` failed. A batch that advanced
    /// the stored offset before failing continues from the new offset; any
    /// other payload is returned unchanged.
    pub(crate) async fn retry_payload(&self, payload: TickPayload) -> TickPayload {
        match payload {
            TickPayload::CampaignBatch {
                campaign_id,
                offset,
                token: presented,
            } => {
                let offset = match self.queue.store().get_campaign(campaign_id).await {
                    Ok(Some(run))
                        if run
                            .token
                            .as_deref()
                            .is_some_and(|held| token::matches(held, &presented)) =>
                    {
                        run.next_offset
                    }
                    _ => offset,
                };

                TickPayload::CampaignBatch {
                    campaign_id,
                    offset,
                    token: presented,
                }
            }
            other => other,
        }
    }

    /// Run one batch tick.
    ///
    /// # Errors
    ///
    /// Fails only when the directory or store cannot be read. Stale ticks
    /// return [`BatchOutcome::Ignored`].
    #[tracing::instrument(level = "debug", skip(self, presented))]
    pub async fn run_batch(
        &self,
        id: CampaignId,
        offset: usize,
        presented: &str,
    ) -> Result<BatchOutcome, DeliveryError> {
        let Some(mut run) = self.queue.store().get_campaign(id).await? else {
            tracing::debug!("Campaign {id} no longer exists, ignoring batch");
            return Ok(BatchOutcome::Ignored);
        };

        let valid = run
            .token
            .as_deref()
            .is_some_and(|held| token::matches(held, presented))
            && run.next_offset == offset
            && matches!(
                run.status,
                CampaignStatus::Sending | CampaignStatus::Scheduled
            );
        if !valid {
            tracing::debug!("Stale batch for campaign {id} at offset {offset}, ignoring");
            return Ok(BatchOutcome::Ignored);
        }

        let guard = CampaignGuard {
            token: presented,
            offset,
        };
        let now = self.queue.clock().now();
        let size = self.config.batch_size.max(1);
        let recipients = self
            .directory
            .page(RecipientFilter::Newsletter, offset, size)
            .await?;

        if recipients.is_empty() {
            let total_queued = run.queued_count;
            run.status = CampaignStatus::Sent;
            run.token = None;
            run.next_offset = 0;
            run.completed_at = Some(now);
            run.updated_at = now;

            if !self.queue.store().swap_campaign(&run, guard).await? {
                return Ok(BatchOutcome::Ignored);
            }

            internal!(level = INFO, "Campaign {id} sent, {total_queued} items queued");
            return Ok(BatchOutcome::Completed { total_queued });
        }

        let variant_a = self.render(&run.variant_a)?;
        let variant_b = run
            .variant_b
            .as_ref()
            .map(|content| self.render(content))
            .transpose()?;

        let mut queued = 0;
        for recipient in &recipients {
            let shared = match &variant_b {
                Some(b) if recipient.id.get() % 2 == 1 => b,
                _ => &variant_a,
            };
            let personal = personalize(shared, self.templates.site(), recipient);

            let request = EnqueueRequest::new(
                recipient.id,
                TemplateKind::CustomCampaign,
                personal.subject,
                personal.body,
            )
            .with_priority(run.priority)
            .for_campaign(id);

            match self.queue.enqueue(request).await {
                Ok(_) => queued += 1,
                Err(e) => {
                    tracing::warn!(recipient = %recipient.id, "Skipping campaign recipient: {e}");
                }
            }
        }

        let next_offset = offset + recipients.len();
        run.status = CampaignStatus::Sending;
        run.next_offset = next_offset;
        run.queued_count += queued;
        run.updated_at = now;

        if !self.queue.store().swap_campaign(&run, guard).await? {
            tracing::warn!("Campaign {id} changed during batch at offset {offset}");
            return Ok(BatchOutcome::Ignored);
        }

        self.scheduler
            .schedule_in(
                self.config.batch_delay(),
                TickPayload::CampaignBatch {
                    campaign_id: id,
                    offset: next_offset,
                    token: presented.to_string(),
                },
            )
            .await?;

        Ok(BatchOutcome::Queued {
            queued,
            next_offset,
        })
    }

    fn render(&self, content: &CampaignContent) -> Result<Rendered, DeliveryError> {
        self.templates
            .render(TemplateKind::CustomCampaign, None, &[], Some(content))
    }
}
