//! One dispatch tick.

use std::time::Duration;

use missive_common::internal;
use tokio::time::Instant;

use super::DispatchProcessor;
use crate::{DeliveryError, recipient::RecipientCache};

/// What one dispatch tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub claimed: usize,
    pub sent: usize,
    /// Claimed items the pipeline did not deliver
    pub failed: usize,
    /// Items another worker claimed first
    pub skipped: usize,
    /// Stuck items returned to pending before fetching
    pub recovered: usize,
    pub budget_exhausted: bool,
    pub paused: bool,
}

impl DispatchProcessor {
    /// Recover stuck items, then claim and send due items in priority order
    /// until the batch or the time budget runs out.
    ///
    /// # Errors
    ///
    /// Fails only when the queue cannot be read at all. Per-item failures are
    /// recorded against the item.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn tick(&self) -> Result<TickReport, DeliveryError> {
        let runtime = self.runtime()?;
        let queue = &runtime.queue;
        let started = Instant::now();
        let budget = Duration::from_secs(self.time_budget_secs);

        let mut report = TickReport::default();

        if queue.is_paused() {
            report.paused = true;
            return Ok(report);
        }

        report.recovered = queue.recover_stuck(self.stuck_timeout()).await?;

        let due = queue.fetch_due(self.batch_limit).await?;
        report.fetched = due.len();

        let mut cache = RecipientCache::new();
        for item in &due {
            if started.elapsed() >= budget {
                report.budget_exhausted = true;
                internal!(
                    level = INFO,
                    "Tick budget of {}s spent, {} items left for the next tick",
                    self.time_budget_secs,
                    report.fetched - report.claimed - report.skipped
                );
                break;
            }

            match queue.claim(&item.id).await {
                Ok(true) => report.claimed += 1,
                Ok(false) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(item = %item.id, "Failed to claim item: {e}");
                    report.skipped += 1;
                    continue;
                }
            }

            if runtime.pipeline.send(item, &mut cache).await {
                report.sent += 1;
            } else {
                report.failed += 1;
            }
        }

        if let Some(metrics) = missive_metrics::try_metrics() {
            metrics
                .queue
                .record_tick(
                    started.elapsed().as_secs_f64(),
                    u64::try_from(report.sent).unwrap_or(u64::MAX),
                );
        }

        Ok(report)
    }
}
