//! The per-item send pipeline.
//!
//! Runs one claimed item from eligibility through transport and records
//! the outcome. Nothing in here returns an error to the caller: every
//! failure is written against the item so one bad job never stops a tick.

use std::{sync::Arc, time::Instant};

use missive_common::{audit, internal};
use missive_store::{BounceKind, DeliveryLogEntry, DeliveryOutcome, QueueItem};
use tokio::sync::broadcast;

use crate::{
    DeliveryError, DeliveryEvent,
    bounce::BounceHandler,
    queue::{EmailQueue, FailureOutcome},
    recipient::{RecipientCache, RecipientDirectory, check_eligibility, deliverable_address},
    tracking::Tracker,
    transport::{MailTransport, OutgoingMessage},
};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SendPipeline {
    queue: EmailQueue,
    directory: Arc<dyn RecipientDirectory>,
    transport: Arc<dyn MailTransport>,
    tracker: Arc<Tracker>,
    bounces: BounceHandler,
    from_address: String,
    events: broadcast::Sender<DeliveryEvent>,
}

impl SendPipeline {
    pub fn new(
        queue: EmailQueue,
        directory: Arc<dyn RecipientDirectory>,
        transport: Arc<dyn MailTransport>,
        tracker: Arc<Tracker>,
        bounces: BounceHandler,
        from_address: String,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            queue,
            directory,
            transport,
            tracker,
            bounces,
            from_address,
            events,
        }
    }

    /// Outcome notifications for every item that leaves the pipeline.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events.subscribe()
    }

    /// Send one claimed item. `true` when the item was delivered, or
    /// deliberately swallowed in demo mode.
    #[tracing::instrument(level = "debug", skip_all, fields(item = %item.id))]
    pub async fn send(&self, item: &QueueItem, cache: &mut RecipientCache) -> bool {
        match self.try_send(item, cache).await {
            Ok(sent) => sent,
            Err(e) => {
                tracing::error!(item = %item.id, "Send pipeline error: {e}");
                self.fail(item, &e.to_string(), false).await;
                false
            }
        }
    }

    async fn try_send(
        &self,
        item: &QueueItem,
        cache: &mut RecipientCache,
    ) -> Result<bool, DeliveryError> {
        let flags = self.queue.flags();

        if !flags.sending_enabled() {
            self.cancel(item, "sending disabled").await?;
            return Ok(false);
        }

        if flags.pause_all() {
            internal!(level = DEBUG, "Pause-all set, leaving {} untouched", item.id);
            return Ok(false);
        }

        let Some(recipient) = cache.get(self.directory.as_ref(), item.recipient_id).await? else {
            self.fail(item, &format!("recipient {} not found", item.recipient_id), false)
                .await;
            return Ok(false);
        };

        if let Err(reason) = check_eligibility(item.template_kind, &recipient) {
            self.fail(item, &reason, false).await;
            return Ok(false);
        }

        let Some(address) = deliverable_address(&recipient) else {
            self.fail(item, "no deliverable address", false).await;
            return Ok(false);
        };

        if flags.demo_mode() {
            self.cancel(item, "demo mode").await?;
            return Ok(true);
        }

        let html_body = match self.tracker.instrument(&item.body, item).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(item = %item.id, "Tracking instrumentation failed, sending plain body: {e}");
                item.body.clone()
            }
        };

        let message = OutgoingMessage {
            item_id: item.id,
            from: self.from_address.clone(),
            to: address,
            subject: item.subject.clone(),
            html_body,
        };

        audit::log_send_attempt(
            &item.id.to_string(),
            &message.to,
            item.attempts.saturating_add(1),
        );
        let started = Instant::now();

        match self.transport.send(&message).await {
            Ok(()) => {
                if !self.queue.mark_sent(&item.id).await? {
                    internal!(
                        level = WARN,
                        "Item {} changed state while sending, delivered anyway",
                        item.id
                    );
                }

                audit::log_send_success(
                    &item.id.to_string(),
                    &message.to,
                    started.elapsed().as_millis(),
                );
                self.log_outcome(item, DeliveryOutcome::Sent, None).await;
                let _ = self.events.send(DeliveryEvent::Sent {
                    item_id: item.id,
                    recipient_id: item.recipient_id,
                    template_kind: item.template_kind,
                });

                Ok(true)
            }
            Err(e) => {
                let permanent = e.is_permanent();
                self.fail(item, &e.to_string(), permanent).await;
                Ok(false)
            }
        }
    }

    async fn cancel(&self, item: &QueueItem, reason: &str) -> Result<(), DeliveryError> {
        self.queue.mark_cancelled(&item.id, reason).await?;
        self.log_outcome(item, DeliveryOutcome::Cancelled, Some(reason))
            .await;
        let _ = self.events.send(DeliveryEvent::Cancelled {
            item_id: item.id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Route a failure through the retry path. Store errors here are only
    /// logged; stuck recovery picks the item up again.
    async fn fail(&self, item: &QueueItem, reason: &str, hard_bounce: bool) {
        let outcome = match self.queue.mark_failed(&item.id, reason).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(item = %item.id, "Failed to record failure ({reason}): {e}");
                return;
            }
        };

        if outcome == FailureOutcome::Skipped {
            return;
        }

        self.log_outcome(item, DeliveryOutcome::Failed, Some(reason))
            .await;

        if hard_bounce
            && let Err(e) = self
                .bounces
                .record(item.recipient_id, BounceKind::Hard, reason)
                .await
        {
            tracing::error!(recipient = %item.recipient_id, "Failed to record bounce: {e}");
        }

        let _ = self.events.send(DeliveryEvent::Failed {
            item_id: item.id,
            recipient_id: item.recipient_id,
            error: reason.to_string(),
            dead_lettered: matches!(outcome, FailureOutcome::DeadLettered { .. }),
        });
    }

    async fn log_outcome(&self, item: &QueueItem, outcome: DeliveryOutcome, error: Option<&str>) {
        let entry = DeliveryLogEntry {
            item_id: item.id,
            recipient_id: item.recipient_id,
            content_ids: item.content_ids(),
            campaign_id: item.campaign_id,
            template_kind: item.template_kind,
            outcome,
            error: error.map(str::to_string),
            logged_at: self.queue.clock().now(),
        };

        if let Err(e) = self.queue.store().append_delivery_log(&entry).await {
            tracing::error!(item = %item.id, "Failed to append delivery log: {e}");
        }
    }
}
