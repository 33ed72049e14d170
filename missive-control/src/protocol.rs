//! Control protocol types

use std::fmt::{Display, Formatter};

use chrono::{DateTime, TimeZone, Utc};
use missive_common::{
    Cadence, CampaignId, QueueItemId, QueueStatus, RecipientId, TemplateKind,
};
use serde::{Deserialize, Serialize};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Render a Unix timestamp (seconds) for humans.
fn format_timestamp(secs: i64) -> String {
    Utc.timestamp_opt(secs, 0).single().map_or_else(
        || "unknown".to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

/// Request sent to the control server (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub version: u32,
    /// Bearer token, checked against the configured hashes when the server
    /// requires authentication.
    #[serde(default)]
    pub token: Option<String>,
    pub command: RequestCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestCommand {
    Queue(QueueCommand),
    Campaign(CampaignCommand),
    Digest(DigestCommand),
    System(SystemCommand),
}

/// Queue administration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueCommand {
    /// Stop dispatch ticks from sending
    Pause,
    Resume,
    Health,
    List {
        status: Option<QueueStatus>,
        recipient: Option<RecipientId>,
        campaign: Option<CampaignId>,
        limit: Option<usize>,
    },
    DeadLetters {
        limit: Option<usize>,
    },
    /// Requeue every dead letter and failed item
    RetryAllFailed,
    RetrySelected {
        ids: Vec<QueueItemId>,
    },
    Cancel {
        id: QueueItemId,
    },
    Enqueue(EnqueueSpec),
    /// Run one dispatch tick immediately
    ProcessNow,
    /// Run the retention sweep immediately
    Cleanup,
    Flags,
    SetFlag {
        flag: FlagName,
        value: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueSpec {
    pub recipient_id: RecipientId,
    pub template_kind: TemplateKind,
    pub subject: String,
    pub body: String,
    pub priority: Option<u8>,
    /// Unix seconds; immediately when absent
    pub scheduled_at: Option<i64>,
}

/// The runtime switches an operator may flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagName {
    Paused,
    SendingEnabled,
    DemoMode,
    PauseAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CampaignCommand {
    Create {
        name: String,
        variant_a: CampaignVariant,
        variant_b: Option<CampaignVariant>,
        priority: Option<u8>,
    },
    Start {
        id: CampaignId,
        /// Continue from the persisted offset instead of the beginning
        resume: bool,
    },
    Schedule {
        id: CampaignId,
        /// Unix seconds
        at: i64,
    },
    Stop {
        id: CampaignId,
    },
    /// Stop and cancel every pending item of the campaign
    Cancel {
        id: CampaignId,
    },
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignVariant {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DigestCommand {
    Start { cadence: Cadence },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemCommand {
    Ping,
    Status,
}

/// Response from the control server (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub version: u32,
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    Ok,
    Data(Box<ResponseData>),
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    QueueHealth(QueueHealthReport),
    QueueList(Vec<QueueItemSummary>),
    DeadLetters(Vec<DeadLetterSummary>),
    /// Number of rows an operation touched
    Affected(usize),
    Enqueued(QueueItemId),
    Tick(TickSummary),
    Cleanup(CleanupSummary),
    Flags(FlagReport),
    CampaignCreated(CampaignId),
    Campaigns(Vec<CampaignSummary>),
    DigestStarted { run_id: String },
    SystemStatus(SystemStatus),
    Message(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueHealthReport {
    pub pending: usize,
    pub processing: usize,
    pub stuck: usize,
    pub failed: usize,
    pub dead_letter: usize,
    pub avg_wait_secs: f64,
    pub sent_last_hour: usize,
    pub paused: bool,
}

impl Display for QueueHealthReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Pending:         {}", self.pending)?;
        writeln!(f, "Processing:      {}", self.processing)?;
        writeln!(f, "Stuck:           {}", self.stuck)?;
        writeln!(f, "Failed:          {}", self.failed)?;
        writeln!(f, "Dead letters:    {}", self.dead_letter)?;
        writeln!(f, "Average wait:    {:.1}s", self.avg_wait_secs)?;
        writeln!(f, "Sent last hour:  {}", self.sent_last_hour)?;
        write!(
            f,
            "State:           {}",
            if self.paused { "paused" } else { "running" }
        )
    }
}

/// One queue item (for list command)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItemSummary {
    pub id: QueueItemId,
    pub recipient_id: RecipientId,
    pub template_kind: TemplateKind,
    pub subject: String,
    pub status: QueueStatus,
    pub priority: u8,
    pub attempts: u32,
    pub campaign_id: Option<CampaignId>,
    /// Unix seconds
    pub scheduled_at: i64,
    pub error_log: Option<String>,
}

impl Display for QueueItemSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ID:        {}", self.id)?;
        writeln!(f, "Recipient: {}", self.recipient_id)?;
        writeln!(f, "Template:  {}", self.template_kind)?;
        writeln!(f, "Subject:   {}", self.subject)?;
        writeln!(f, "Status:    {}", self.status)?;
        writeln!(f, "Priority:  {}", self.priority)?;
        writeln!(f, "Attempts:  {}", self.attempts)?;
        if let Some(campaign) = self.campaign_id {
            writeln!(f, "Campaign:  {campaign}")?;
        }
        if let Some(error) = &self.error_log {
            writeln!(f, "Last error: {error}")?;
        }
        write!(f, "Scheduled: {}", format_timestamp(self.scheduled_at))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterSummary {
    pub item_id: QueueItemId,
    pub recipient_id: RecipientId,
    pub template_kind: TemplateKind,
    pub subject: String,
    pub attempts: u32,
    pub final_error: String,
    /// Unix seconds
    pub dead_lettered_at: i64,
}

impl Display for DeadLetterSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ID:        {}", self.item_id)?;
        writeln!(f, "Recipient: {}", self.recipient_id)?;
        writeln!(f, "Template:  {}", self.template_kind)?;
        writeln!(f, "Subject:   {}", self.subject)?;
        writeln!(f, "Attempts:  {}", self.attempts)?;
        writeln!(f, "Error:     {}", self.final_error)?;
        write!(f, "Failed at: {}", format_timestamp(self.dead_lettered_at))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub fetched: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub recovered: usize,
    pub budget_exhausted: bool,
    pub paused: bool,
}

impl Display for TickSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.paused {
            return f.write_str("Queue is paused, nothing sent");
        }
        write!(
            f,
            "Fetched {}, sent {}, failed {}, skipped {}, recovered {}",
            self.fetched, self.sent, self.failed, self.skipped, self.recovered
        )?;
        if self.budget_exhausted {
            f.write_str(" (time budget exhausted)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub sent: usize,
    pub cancelled: usize,
    pub delivery_log: usize,
    pub tracking: usize,
    pub dead_letters: usize,
}

impl Display for CleanupSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Removed {} sent, {} cancelled, {} delivery log, {} tracking, {} dead letter row(s)",
            self.sent, self.cancelled, self.delivery_log, self.tracking, self.dead_letters
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagReport {
    pub paused: bool,
    pub sending_enabled: bool,
    pub demo_mode: bool,
    pub pause_all: bool,
}

impl Display for FlagReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Paused:          {}", self.paused)?;
        writeln!(f, "Sending enabled: {}", self.sending_enabled)?;
        writeln!(f, "Demo mode:       {}", self.demo_mode)?;
        write!(f, "Pause all:       {}", self.pause_all)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub id: CampaignId,
    pub name: String,
    pub status: String,
    pub next_offset: usize,
    pub queued_count: usize,
    pub total_recipients: usize,
    pub has_variant_b: bool,
    /// Unix seconds
    pub scheduled_for: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Display for CampaignSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ID:        {}", self.id)?;
        writeln!(f, "Name:      {}", self.name)?;
        writeln!(f, "Status:    {}", self.status)?;
        writeln!(
            f,
            "Progress:  {}/{} recipients, {} queued",
            self.next_offset, self.total_recipients, self.queued_count
        )?;
        if self.has_variant_b {
            writeln!(f, "A/B:       yes")?;
        }
        if let Some(at) = self.scheduled_for {
            writeln!(f, "Scheduled: {}", format_timestamp(at))?;
        }
        if let Some(at) = self.completed_at {
            writeln!(f, "Completed: {}", format_timestamp(at))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_secs: u64,
    /// Live items in the queue, all statuses
    pub queue_size: usize,
    pub paused: bool,
    pub tracking_enabled: bool,
}

impl Display for SystemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Version:   {}", self.version)?;
        writeln!(f, "Uptime:    {}s", self.uptime_secs)?;
        writeln!(f, "Queue:     {} item(s)", self.queue_size)?;
        writeln!(f, "Paused:    {}", self.paused)?;
        write!(f, "Tracking:  {}", self.tracking_enabled)
    }
}

/// Seconds since the Unix epoch
#[must_use]
pub const fn unix_seconds(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

/// The inverse of [`unix_seconds`]. `None` when out of range.
#[must_use]
pub fn from_unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

impl Request {
    /// Create a new request with the current protocol version
    #[must_use]
    pub const fn new(command: RequestCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            token: None,
            command,
        }
    }

    #[must_use]
    pub fn with_token(command: RequestCommand, token: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            token: Some(token.into()),
            command,
        }
    }

    /// Only an exact version match is accepted
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

impl Response {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error(message.into()),
        }
    }

    #[must_use]
    pub const fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Ok,
        }
    }

    #[must_use]
    pub fn data(data: ResponseData) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Data(Box::new(data)),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.payload, ResponsePayload::Error(_))
    }

    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_current_version() {
        let request = Request::with_token(
            RequestCommand::Queue(QueueCommand::Pause),
            "operator-token",
        );
        assert!(request.is_version_compatible());
        assert_eq!(request.token.as_deref(), Some("operator-token"));

        let stale = Request {
            version: PROTOCOL_VERSION + 1,
            ..request
        };
        assert!(!stale.is_version_compatible());
    }

    #[test]
    fn test_response_success() {
        assert!(Response::ok().is_success());
        assert!(Response::data(ResponseData::Affected(3)).is_success());
        assert!(!Response::error("nope").is_success());
    }

    #[test]
    fn test_bincode_preserves_typed_ids() {
        let id = QueueItemId::generate();
        let request = Request::new(RequestCommand::Queue(QueueCommand::RetrySelected {
            ids: vec![id],
        }));

        let bytes = bincode::serde::encode_to_vec(&request, bincode::config::legacy()).unwrap();
        let (decoded, _): (Request, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::legacy()).unwrap();

        match decoded.command {
            RequestCommand::Queue(QueueCommand::RetrySelected { ids }) => assert_eq!(ids, vec![id]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_tick_summary_display() {
        let summary = TickSummary {
            fetched: 4,
            sent: 3,
            failed: 1,
            budget_exhausted: true,
            ..TickSummary::default()
        };
        let text = summary.to_string();
        assert!(text.contains("sent 3"));
        assert!(text.ends_with("(time budget exhausted)"));

        let paused = TickSummary {
            paused: true,
            ..TickSummary::default()
        };
        assert_eq!(paused.to_string(), "Queue is paused, nothing sent");
    }

    #[test]
    fn test_timestamp_formatting() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
        let now = Utc::now();
        let secs = unix_seconds(now);
        assert_eq!(from_unix_seconds(secs).map(|at| at.timestamp()), Some(secs));
    }
}
