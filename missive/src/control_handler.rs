//! Control handler implementation for missive
//!
//! Maps control socket commands onto [`QueueAdmin`] calls and converts the
//! results into protocol DTOs.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use missive_control::{
    CampaignCommand, CommandHandler, ControlError, DigestCommand, QueueCommand, Request,
    RequestCommand, Response, ResponseData, SystemCommand,
    protocol::{
        CampaignSummary, CampaignVariant, CleanupSummary, DeadLetterSummary, EnqueueSpec,
        FlagName, FlagReport, QueueHealthReport, QueueItemSummary, SystemStatus, TickSummary,
        from_unix_seconds, unix_seconds,
    },
};
use missive_delivery::{
    CleanupReport, DeliveryError, EnqueueRequest, Flag, FlagState, NewCampaign, QueueAdmin,
    QueueHealth, TickReport,
};
use missive_store::{CampaignContent, CampaignRun, DeadLetterRecord, ItemFilter, QueueItem};

type ControlResult = missive_control::Result<Response>;

fn server_error(e: DeliveryError) -> ControlError {
    ControlError::ServerError(e.to_string())
}

/// Handler for control commands
pub struct MissiveControlHandler {
    admin: Arc<dyn QueueAdmin>,
    tracking_enabled: bool,
    /// Server start time for uptime calculation
    start_time: Instant,
}

impl MissiveControlHandler {
    #[must_use]
    pub fn new(admin: Arc<dyn QueueAdmin>, tracking_enabled: bool) -> Self {
        Self {
            admin,
            tracking_enabled,
            start_time: Instant::now(),
        }
    }
}

#[async_trait]
impl CommandHandler for MissiveControlHandler {
    async fn handle_request(&self, request: Request) -> ControlResult {
        match request.command {
            RequestCommand::Queue(command) => self.handle_queue_command(command).await,
            RequestCommand::Campaign(command) => self.handle_campaign_command(command).await,
            RequestCommand::Digest(command) => self.handle_digest_command(command).await,
            RequestCommand::System(command) => self.handle_system_command(command).await,
        }
    }
}

impl MissiveControlHandler {
    async fn handle_queue_command(&self, command: QueueCommand) -> ControlResult {
        match command {
            QueueCommand::Pause => {
                self.admin.pause();
                tracing::info!("Queue paused via control socket");
                Ok(Response::ok())
            }

            QueueCommand::Resume => {
                self.admin.resume();
                tracing::info!("Queue resumed via control socket");
                Ok(Response::ok())
            }

            QueueCommand::Health => {
                let health = self.admin.queue_health().await.map_err(server_error)?;
                Ok(Response::data(ResponseData::QueueHealth(health_report(
                    &health,
                ))))
            }

            QueueCommand::List {
                status,
                recipient,
                campaign,
                limit,
            } => {
                let filter = ItemFilter {
                    statuses: status.into_iter().collect(),
                    recipient_id: recipient,
                    campaign_id: campaign,
                    limit,
                };
                let items = self.admin.list_items(&filter).await.map_err(server_error)?;
                Ok(Response::data(ResponseData::QueueList(
                    items.iter().map(item_summary).collect(),
                )))
            }

            QueueCommand::DeadLetters { limit } => {
                let records = self
                    .admin
                    .list_dead_letters(limit)
                    .await
                    .map_err(server_error)?;
                Ok(Response::data(ResponseData::DeadLetters(
                    records.iter().map(dead_letter_summary).collect(),
                )))
            }

            QueueCommand::RetryAllFailed => {
                let count = self.admin.retry_all_failed().await.map_err(server_error)?;
                tracing::info!(count, "Requeued failed items via control socket");
                Ok(Response::data(ResponseData::Affected(count)))
            }

            QueueCommand::RetrySelected { ids } => {
                let count = self
                    .admin
                    .retry_selected(&ids)
                    .await
                    .map_err(server_error)?;
                Ok(Response::data(ResponseData::Affected(count)))
            }

            QueueCommand::Cancel { id } => {
                if self.admin.cancel_item(&id).await.map_err(server_error)? {
                    Ok(Response::data(ResponseData::Message(format!(
                        "Cancelled {id}"
                    ))))
                } else {
                    Err(ControlError::ServerError(format!(
                        "{id} is not pending or processing"
                    )))
                }
            }

            QueueCommand::Enqueue(spec) => {
                let request = enqueue_request(spec)?;
                let id = self.admin.enqueue(request).await.map_err(server_error)?;
                Ok(Response::data(ResponseData::Enqueued(id)))
            }

            QueueCommand::ProcessNow => {
                let report = self.admin.run_tick_now().await.map_err(server_error)?;
                Ok(Response::data(ResponseData::Tick(tick_summary(&report))))
            }

            QueueCommand::Cleanup => {
                let report = self.admin.cleanup_now().await.map_err(server_error)?;
                Ok(Response::data(ResponseData::Cleanup(cleanup_summary(
                    &report,
                ))))
            }

            QueueCommand::Flags => Ok(Response::data(ResponseData::Flags(flag_report(
                self.admin.flag_state(),
            )))),

            QueueCommand::SetFlag { flag, value } => {
                self.admin.set_flag(flag_from_name(flag), value);
                tracing::info!(?flag, value, "Flag changed via control socket");
                Ok(Response::data(ResponseData::Flags(flag_report(
                    self.admin.flag_state(),
                ))))
            }
        }
    }

    async fn handle_campaign_command(&self, command: CampaignCommand) -> ControlResult {
        match command {
            CampaignCommand::Create {
                name,
                variant_a,
                variant_b,
                priority,
            } => {
                let id = self
                    .admin
                    .create_campaign(NewCampaign {
                        name,
                        variant_a: campaign_content(variant_a),
                        variant_b: variant_b.map(campaign_content),
                        priority,
                    })
                    .await
                    .map_err(server_error)?;
                Ok(Response::data(ResponseData::CampaignCreated(id)))
            }

            CampaignCommand::Start { id, resume } => {
                self.admin
                    .start_campaign(id, resume)
                    .await
                    .map_err(server_error)?;
                Ok(Response::ok())
            }

            CampaignCommand::Schedule { id, at } => {
                let at = from_unix_seconds(at)
                    .ok_or_else(|| ControlError::Protocol(format!("Invalid timestamp: {at}")))?;
                self.admin
                    .schedule_campaign(id, at)
                    .await
                    .map_err(server_error)?;
                Ok(Response::ok())
            }

            CampaignCommand::Stop { id } => {
                self.admin.stop_campaign(id).await.map_err(server_error)?;
                Ok(Response::ok())
            }

            CampaignCommand::Cancel { id } => {
                let cancelled = self.admin.cancel_campaign(id).await.map_err(server_error)?;
                Ok(Response::data(ResponseData::Affected(cancelled)))
            }

            CampaignCommand::List => {
                let runs = self.admin.list_campaigns().await.map_err(server_error)?;
                Ok(Response::data(ResponseData::Campaigns(
                    runs.iter().map(campaign_summary).collect(),
                )))
            }
        }
    }

    async fn handle_digest_command(&self, command: DigestCommand) -> ControlResult {
        match command {
            DigestCommand::Start { cadence } => {
                let run_id = self
                    .admin
                    .start_digest(cadence)
                    .await
                    .map_err(server_error)?;
                Ok(Response::data(ResponseData::DigestStarted { run_id }))
            }
        }
    }

    async fn handle_system_command(&self, command: SystemCommand) -> ControlResult {
        match command {
            SystemCommand::Ping => Ok(Response::ok()),

            SystemCommand::Status => {
                let health = self.admin.queue_health().await.map_err(server_error)?;

                let status = SystemStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    uptime_secs: self.start_time.elapsed().as_secs(),
                    queue_size: health.pending + health.processing,
                    paused: health.paused,
                    tracking_enabled: self.tracking_enabled,
                };

                Ok(Response::data(ResponseData::SystemStatus(status)))
            }
        }
    }
}

fn enqueue_request(spec: EnqueueSpec) -> missive_control::Result<EnqueueRequest> {
    let mut request =
        EnqueueRequest::new(spec.recipient_id, spec.template_kind, spec.subject, spec.body);

    if let Some(priority) = spec.priority {
        request = request.with_priority(priority);
    }

    if let Some(at) = spec.scheduled_at {
        let at = from_unix_seconds(at)
            .ok_or_else(|| ControlError::Protocol(format!("Invalid timestamp: {at}")))?;
        request = request.scheduled_at(at);
    }

    Ok(request)
}

const fn flag_from_name(name: FlagName) -> Flag {
    match name {
        FlagName::Paused => Flag::Paused,
        FlagName::SendingEnabled => Flag::SendingEnabled,
        FlagName::DemoMode => Flag::DemoMode,
        FlagName::PauseAll => Flag::PauseAll,
    }
}

const fn flag_report(state: FlagState) -> FlagReport {
    FlagReport {
        paused: state.paused,
        sending_enabled: state.sending_enabled,
        demo_mode: state.demo_mode,
        pause_all: state.pause_all,
    }
}

fn campaign_content(variant: CampaignVariant) -> CampaignContent {
    CampaignContent {
        subject: variant.subject,
        body: variant.body,
    }
}

const fn health_report(health: &QueueHealth) -> QueueHealthReport {
    QueueHealthReport {
        pending: health.pending,
        processing: health.processing,
        stuck: health.stuck,
        failed: health.failed,
        dead_letter: health.dead_letter,
        avg_wait_secs: health.avg_wait_secs,
        sent_last_hour: health.sent_last_hour,
        paused: health.paused,
    }
}

fn item_summary(item: &QueueItem) -> QueueItemSummary {
    QueueItemSummary {
        id: item.id,
        recipient_id: item.recipient_id,
        template_kind: item.template_kind,
        subject: item.subject.clone(),
        status: item.status,
        priority: item.priority,
        attempts: item.attempts,
        campaign_id: item.campaign_id,
        scheduled_at: unix_seconds(item.scheduled_at),
        error_log: item.error_log.clone(),
    }
}

fn dead_letter_summary(record: &DeadLetterRecord) -> DeadLetterSummary {
    DeadLetterSummary {
        item_id: record.item_id,
        recipient_id: record.recipient_id,
        template_kind: record.template_kind,
        subject: record.subject.clone(),
        attempts: record.attempts,
        final_error: record.final_error.clone(),
        dead_lettered_at: unix_seconds(record.dead_lettered_at),
    }
}

const fn tick_summary(report: &TickReport) -> TickSummary {
    TickSummary {
        fetched: report.fetched,
        sent: report.sent,
        failed: report.failed,
        skipped: report.skipped,
        recovered: report.recovered,
        budget_exhausted: report.budget_exhausted,
        paused: report.paused,
    }
}

const fn cleanup_summary(report: &CleanupReport) -> CleanupSummary {
    CleanupSummary {
        sent: report.sent,
        cancelled: report.cancelled,
        delivery_log: report.delivery_log,
        tracking: report.tracking,
        dead_letters: report.dead_letters,
    }
}

fn campaign_summary(run: &CampaignRun) -> CampaignSummary {
    CampaignSummary {
        id: run.id,
        name: run.name.clone(),
        status: run.status.to_string(),
        next_offset: run.next_offset,
        queued_count: run.queued_count,
        total_recipients: run.total_recipients,
        has_variant_b: run.variant_b.is_some(),
        scheduled_for: run.scheduled_for.map(unix_seconds),
        completed_at: run.completed_at.map(unix_seconds),
    }
}

