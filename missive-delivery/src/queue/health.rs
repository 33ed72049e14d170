//! Queue health snapshot for operators and readiness checks.

use chrono::Duration;
use missive_common::{QueueStatus, clock::saturating_sub};
use missive_store::ItemFilter;
use serde::{Deserialize, Serialize};

use super::EmailQueue;
use crate::DeliveryError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueHealth {
    pub pending: usize,
    pub processing: usize,
    /// Processing items older than the stuck timeout
    pub stuck: usize,
    pub failed: usize,
    pub dead_letter: usize,
    /// Mean time due pending items have been waiting, in seconds
    pub avg_wait_secs: f64,
    pub sent_last_hour: usize,
    pub paused: bool,
}

impl EmailQueue {
    /// Count items by state and publish the sizes to metrics.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn health(&self, stuck_timeout: Duration) -> Result<QueueHealth, DeliveryError> {
        let now = self.now();
        let store = self.store();

        let pending = store
            .list_items(&ItemFilter::with_status(QueueStatus::Pending))
            .await?;
        let processing = store
            .list_items(&ItemFilter::with_status(QueueStatus::Processing))
            .await?;
        let failed = store
            .list_items(&ItemFilter::with_status(QueueStatus::Failed))
            .await?
            .len();
        let dead_letter = store.list_dead_letters(None).await?.len();

        let stuck_cutoff = saturating_sub(now, stuck_timeout);
        let stuck = processing
            .iter()
            .filter(|item| item.updated_at < stuck_cutoff)
            .count();

        #[allow(clippy::cast_precision_loss, reason = "Waits and queue sizes are far below 2^52")]
        let waits: Vec<f64> = pending
            .iter()
            .filter(|item| item.scheduled_at <= now)
            .map(|item| (now - item.scheduled_at).num_milliseconds() as f64 / 1000.0)
            .collect();
        #[allow(clippy::cast_precision_loss, reason = "Waits and queue sizes are far below 2^52")]
        let avg_wait_secs = if waits.is_empty() {
            0.0
        } else {
            waits.iter().sum::<f64>() / waits.len() as f64
        };

        let health = QueueHealth {
            pending: pending.len(),
            processing: processing.len(),
            stuck,
            failed,
            dead_letter,
            avg_wait_secs,
            sent_last_hour: store.count_sent_since(now - Duration::hours(1)).await?,
            paused: self.is_paused(),
        };

        if let Some(metrics) = missive_metrics::try_metrics() {
            for (status, size) in [
                ("pending", health.pending),
                ("processing", health.processing),
                ("failed", health.failed),
                ("stuck", health.stuck),
                ("dead_letter", health.dead_letter),
            ] {
                metrics
                    .queue
                    .set_queue_size(status, u64::try_from(size).unwrap_or(u64::MAX));
            }
        }

        Ok(health)
    }
}
