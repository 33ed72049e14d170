//! Periodic digests.
//!
//! A run walks every recipient subscribed at one cadence, page by page. Each
//! recipient gets up to [`Cadence::items_per_digest`] of the newest letters
//! they have neither been sent nor already have waiting in the queue. When
//! nothing is left, and no digest is still waiting for them, they get a
//! single "all caught up" note instead.
//!
//! Runs start on their own through one durable `DigestCadence` tick per
//! cadence, which re-arms itself every period, or on demand from the control
//! socket.

use std::{collections::HashSet, sync::Arc};

use missive_common::{Cadence, ContentId, QueueStatus, TemplateKind, internal};
use missive_store::{DeliveryOutcome, ItemFilter, TickPayload};
use serde::Deserialize;

use super::CampaignConfig;
use crate::{
    DeliveryError,
    content::{ContentItem, ContentSource},
    queue::{EmailQueue, EnqueueRequest},
    recipient::{Recipient, RecipientDirectory, RecipientFilter},
    scheduler::TickScheduler,
    template::TemplateRegistry,
};

/// How often each cadence starts a run on its own (periods in seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DigestSchedule {
    /// Default: true
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Default: 86400
    #[serde(default = "defaults::daily_secs")]
    pub daily_secs: u64,

    /// Default: 604800
    #[serde(default = "defaults::weekly_secs")]
    pub weekly_secs: u64,

    /// Default: 2592000 (30 days)
    #[serde(default = "defaults::monthly_secs")]
    pub monthly_secs: u64,
}

impl Default for DigestSchedule {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            daily_secs: defaults::daily_secs(),
            weekly_secs: defaults::weekly_secs(),
            monthly_secs: defaults::monthly_secs(),
        }
    }
}

impl DigestSchedule {
    /// Time between two runs of `cadence`, never less than a second.
    #[must_use]
    pub fn period(&self, cadence: Cadence) -> chrono::Duration {
        let secs = match cadence {
            Cadence::Daily => self.daily_secs,
            Cadence::Weekly => self.weekly_secs,
            Cadence::Monthly => self.monthly_secs,
        };

        i64::try_from(secs.max(1))
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

mod defaults {
    pub const fn enabled() -> bool {
        true
    }

    pub const fn daily_secs() -> u64 {
        86_400
    }

    pub const fn weekly_secs() -> u64 {
        604_800
    }

    pub const fn monthly_secs() -> u64 {
        2_592_000
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestPageReport {
    pub recipients: usize,
    pub digests: usize,
    pub caught_up: usize,
    pub skipped: usize,
    /// A continuation tick was scheduled for the next page.
    pub continued: bool,
}

#[derive(Debug, Clone)]
pub struct DigestOrchestrator {
    queue: EmailQueue,
    directory: Arc<dyn RecipientDirectory>,
    content: Arc<dyn ContentSource>,
    templates: Arc<TemplateRegistry>,
    scheduler: TickScheduler,
    config: CampaignConfig,
}

enum Selection {
    Digest(Vec<ContentItem>),
    CaughtUp,
    Nothing,
}

impl DigestOrchestrator {
    pub fn new(
        queue: EmailQueue,
        directory: Arc<dyn RecipientDirectory>,
        content: Arc<dyn ContentSource>,
        templates: Arc<TemplateRegistry>,
        scheduler: TickScheduler,
        config: CampaignConfig,
    ) -> Self {
        Self {
            queue,
            directory,
            content,
            templates,
            scheduler,
            config,
        }
    }

    /// Begin a run by scheduling its first page. Returns the run id.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn start_run(&self, cadence: Cadence) -> Result<String, DeliveryError> {
        let run_id = ulid::Ulid::new().to_string();
        self.scheduler
            .schedule_in(
                chrono::Duration::zero(),
                TickPayload::DigestPage {
                    cadence,
                    run_id: run_id.clone(),
                    page: 0,
                },
            )
            .await?;

        internal!(level = INFO, "Started {cadence} digest run {run_id}");
        Ok(run_id)
    }

    /// Put one cadence tick per cadence in place, leaving existing ones
    /// alone. With the schedule disabled every cadence tick is removed
    /// instead. Returns the number of ticks added.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn ensure_schedule(&self) -> Result<usize, DeliveryError> {
        let schedule = self.config.digest_schedule;
        let pending = self.scheduler.pending().await?;
        let mut armed = 0;

        for cadence in Cadence::ALL {
            let payload = TickPayload::DigestCadence { cadence };

            if !schedule.enabled {
                self.scheduler.cancel(&payload).await?;
                continue;
            }

            if pending.iter().any(|tick| tick.payload == payload) {
                continue;
            }

            self.scheduler
                .schedule_in(schedule.period(cadence), payload)
                .await?;
            armed += 1;
        }

        if armed > 0 {
            internal!(level = INFO, "Armed {armed} digest cadences");
        }

        Ok(armed)
    }

    /// Re-arm the cadence one period out, then start its run.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn run_cadence(&self, cadence: Cadence) -> Result<String, DeliveryError> {
        let payload = TickPayload::DigestCadence { cadence };
        // A retried tick may leave a second copy behind.
        self.scheduler.cancel(&payload).await?;
        self.scheduler
            .schedule_in(self.config.digest_schedule.period(cadence), payload)
            .await?;

        self.start_run(cadence).await
    }

    const fn filter(&self, cadence: Cadence) -> RecipientFilter {
        RecipientFilter::Digest {
            cadence,
            require_consent: self.config.require_consent,
        }
    }

    /// Queue digests for one page of recipients and schedule the next page
    /// when this one was full.
    ///
    /// # Errors
    ///
    /// Fails when the directory, content source or store cannot be read.
    /// Per-recipient enqueue failures are counted as skipped.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn run_page(
        &self,
        cadence: Cadence,
        run_id: &str,
        page: usize,
    ) -> Result<DigestPageReport, DeliveryError> {
        let size = self.config.digest_page_size.max(1);
        let recipients = self
            .directory
            .page(self.filter(cadence), page.saturating_mul(size), size)
            .await?;
        let pool = self.content.published(self.config.content_pool).await?;

        let mut report = DigestPageReport {
            recipients: recipients.len(),
            ..DigestPageReport::default()
        };

        for recipient in &recipients {
            let selection = self
                .select(recipient, &pool, cadence.items_per_digest())
                .await?;

            let queued = match selection {
                Selection::Digest(items) => self
                    .enqueue_digest(recipient, cadence, &items)
                    .await
                    .map(|()| &mut report.digests),
                Selection::CaughtUp => self
                    .enqueue_caught_up(recipient)
                    .await
                    .map(|()| &mut report.caught_up),
                Selection::Nothing => continue,
            };

            match queued {
                Ok(counter) => *counter += 1,
                Err(e) => {
                    tracing::warn!(recipient = %recipient.id, "Skipping digest: {e}");
                    report.skipped += 1;
                }
            }
        }

        if recipients.len() == size {
            self.scheduler
                .schedule_in(
                    self.config.batch_delay(),
                    TickPayload::DigestPage {
                        cadence,
                        run_id: run_id.to_string(),
                        page: page + 1,
                    },
                )
                .await?;
            report.continued = true;
        } else {
            internal!(level = INFO, "Digest run {run_id} finished after page {page}");
        }

        Ok(report)
    }

    async fn select(
        &self,
        recipient: &Recipient,
        pool: &[ContentItem],
        wanted: usize,
    ) -> Result<Selection, DeliveryError> {
        let store = self.queue.store();

        let mut seen: HashSet<ContentId> = store
            .delivery_log_for_recipient(recipient.id)
            .await?
            .into_iter()
            .filter(|entry| entry.outcome == DeliveryOutcome::Sent)
            .flat_map(|entry| entry.content_ids)
            .collect();

        let waiting = store
            .list_items(&ItemFilter {
                statuses: vec![QueueStatus::Pending, QueueStatus::Processing],
                recipient_id: Some(recipient.id),
                ..ItemFilter::default()
            })
            .await?;
        // A digest or caught-up note already on its way covers this run.
        let covered = waiting
            .iter()
            .any(|item| item.template_kind.is_digest_family());
        seen.extend(waiting.iter().flat_map(|item| item.content_ids()));

        let fresh: Vec<ContentItem> = pool
            .iter()
            .filter(|item| !seen.contains(&item.id))
            .take(wanted)
            .cloned()
            .collect();

        Ok(if !fresh.is_empty() {
            Selection::Digest(fresh)
        } else if covered {
            Selection::Nothing
        } else {
            Selection::CaughtUp
        })
    }

    async fn enqueue_digest(
        &self,
        recipient: &Recipient,
        cadence: Cadence,
        items: &[ContentItem],
    ) -> Result<(), DeliveryError> {
        let kind = cadence.template_kind();
        let rendered = self.templates.render(kind, Some(recipient), items, None)?;

        let mut ids = items.iter().map(|item| item.id);
        let mut request = EnqueueRequest::new(recipient.id, kind, rendered.subject, rendered.body)
            .with_priority(self.config.digest_priority);
        request.related_content_id = ids.next();
        request.bundled_content_ids = ids.collect();

        self.queue.enqueue(request).await?;
        Ok(())
    }

    async fn enqueue_caught_up(&self, recipient: &Recipient) -> Result<(), DeliveryError> {
        let rendered =
            self.templates
                .render(TemplateKind::AllCaughtUp, Some(recipient), &[], None)?;

        self.queue
            .enqueue(
                EnqueueRequest::new(
                    recipient.id,
                    TemplateKind::AllCaughtUp,
                    rendered.subject,
                    rendered.body,
                )
                .with_priority(self.config.digest_priority),
            )
            .await?;
        Ok(())
    }
}
