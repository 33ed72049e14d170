//! Running due campaign and digest continuations.

use missive_store::{ScheduledTick, TickPayload};

use super::DispatchProcessor;
use crate::DeliveryError;

impl DispatchProcessor {
    /// Take due scheduled ticks and hand each to its orchestrator. Returns
    /// the number run.
    ///
    /// A continuation that fails with an error is put back after the batch
    /// delay so a transient outage does not end a run. A failure while
    /// putting it back is logged and the remaining ticks still run.
    ///
    /// # Errors
    ///
    /// Fails only when the scheduled ticks cannot be read.
    pub async fn run_scheduled(&self) -> Result<usize, DeliveryError> {
        let runtime = self.runtime()?;
        let due = runtime
            .scheduler
            .take_due(self.scheduled_tick_limit)
            .await?;
        let count = due.len();

        for tick in due {
            if let Err(e) = self.run_continuation(&tick).await {
                tracing::warn!(tick = %tick.id, "Continuation failed, retrying later: {e}");

                let retry = runtime.campaigns.retry_payload(tick.payload).await;
                if let Err(e) = runtime
                    .scheduler
                    .schedule_in(self.campaign.batch_delay(), retry)
                    .await
                {
                    tracing::error!(
                        tick = %tick.id,
                        "Unable to requeue continuation, dropping it: {e}"
                    );
                }
            }
        }

        Ok(count)
    }

    async fn run_continuation(&self, tick: &ScheduledTick) -> Result<(), DeliveryError> {
        let runtime = self.runtime()?;

        match &tick.payload {
            TickPayload::CampaignBatch {
                campaign_id,
                offset,
                token,
            } => {
                let outcome = runtime
                    .campaigns
                    .run_batch(*campaign_id, *offset, token)
                    .await?;
                tracing::debug!(campaign = %campaign_id, "Campaign batch: {outcome:?}");
            }
            TickPayload::DigestPage {
                cadence,
                run_id,
                page,
            } => {
                let report = runtime.digests.run_page(*cadence, run_id, *page).await?;
                tracing::debug!(run = %run_id, "Digest page {page}: {report:?}");
            }
            TickPayload::DigestCadence { cadence } => {
                let run_id = runtime.digests.run_cadence(*cadence).await?;
                tracing::debug!(run = %run_id, "Scheduled {cadence} digest run started");
            }
        }

        Ok(())
    }
}
