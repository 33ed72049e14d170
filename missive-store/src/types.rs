use std::fmt;

use chrono::{DateTime, Utc};
use missive_common::{
    Cadence, CampaignId, ContentId, QueueItemId, QueueStatus, RecipientId, TemplateKind,
};
use serde::{Deserialize, Serialize};

/// A queued email job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub recipient_id: RecipientId,
    /// Letter this mail is about, when there is one.
    pub related_content_id: Option<ContentId>,
    /// Further letters carried by a digest after the related one.
    pub bundled_content_ids: Vec<ContentId>,
    pub campaign_id: Option<CampaignId>,
    pub template_kind: TemplateKind,
    pub subject: String,
    pub body: String,
    pub status: QueueStatus,
    /// 1..=10, higher is dispatched first.
    pub priority: u8,
    pub attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Reason for the most recent failure or cancellation.
    pub error_log: Option<String>,
}

impl QueueItem {
    /// Every letter id carried by this item, related one first.
    #[must_use]
    pub fn content_ids(&self) -> Vec<ContentId> {
        self.related_content_id
            .into_iter()
            .chain(self.bundled_content_ids.iter().copied())
            .collect()
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.scheduled_at <= now
    }
}

/// Immutable snapshot of an item that exhausted its attempts.
///
/// Carries enough of the original job to requeue it as a fresh item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub item_id: QueueItemId,
    pub recipient_id: RecipientId,
    pub related_content_id: Option<ContentId>,
    pub bundled_content_ids: Vec<ContentId>,
    pub campaign_id: Option<CampaignId>,
    pub template_kind: TemplateKind,
    pub subject: String,
    pub body: String,
    pub priority: u8,
    pub final_error: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    #[must_use]
    pub fn from_item(item: &QueueItem, final_error: &str, now: DateTime<Utc>) -> Self {
        Self {
            item_id: item.id,
            recipient_id: item.recipient_id,
            related_content_id: item.related_content_id,
            bundled_content_ids: item.bundled_content_ids.clone(),
            campaign_id: item.campaign_id,
            template_kind: item.template_kind,
            subject: item.subject.clone(),
            body: item.body.clone(),
            priority: item.priority,
            final_error: final_error.to_string(),
            attempts: item.attempts,
            created_at: item.created_at,
            dead_lettered_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingKind {
    Open,
    Click,
}

impl TrackingKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Click => "click",
        }
    }
}

impl fmt::Display for TrackingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per signed tracking identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: String,
    pub kind: TrackingKind,
    pub item_id: QueueItemId,
    pub recipient_id: RecipientId,
    /// Redirect target for click rows.
    pub url: Option<String>,
    pub fired: bool,
    pub fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Result of firing a tracking identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// No row carries this identifier.
    Unknown,
    /// This call flipped the row to fired.
    First(TrackingEvent),
    /// The row had already fired; nothing changed.
    Repeat(TrackingEvent),
}

impl FireOutcome {
    #[must_use]
    pub const fn event(&self) -> Option<&TrackingEvent> {
        match self {
            Self::Unknown => None,
            Self::First(event) | Self::Repeat(event) => Some(event),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    Sent,
    Failed,
    Cancelled,
}

impl DeliveryOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Durable record of one send outcome. Outlives queue retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub item_id: QueueItemId,
    pub recipient_id: RecipientId,
    pub content_ids: Vec<ContentId>,
    pub campaign_id: Option<CampaignId>,
    pub template_kind: TemplateKind,
    pub outcome: DeliveryOutcome,
    pub error: Option<String>,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BounceKind {
    Hard,
    Soft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BounceRecord {
    pub recipient_id: RecipientId,
    pub kind: BounceKind,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Stopped,
}

impl CampaignStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subject and body of one campaign variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignContent {
    pub subject: String,
    pub body: String,
}

/// A bulk send and its resumable progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignRun {
    pub id: CampaignId,
    pub name: String,
    pub status: CampaignStatus,
    /// Capability held by the currently valid chain of batch ticks.
    pub token: Option<String>,
    pub next_offset: usize,
    pub queued_count: usize,
    pub total_recipients: usize,
    pub variant_a: CampaignContent,
    pub variant_b: Option<CampaignContent>,
    pub priority: u8,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Expected token and offset for a guarded campaign update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignGuard<'a> {
    pub token: &'a str,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickId(pub u64);

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work a scheduled tick continues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickPayload {
    CampaignBatch {
        campaign_id: CampaignId,
        offset: usize,
        token: String,
    },
    DigestPage {
        cadence: Cadence,
        run_id: String,
        page: usize,
    },
    /// Start a digest run for the cadence, then re-arm one period later.
    DigestCadence { cadence: Cadence },
}

/// A durable delayed continuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTick {
    pub id: TickId,
    pub due_at: DateTime<Utc>,
    pub payload: TickPayload,
}

/// Selection criteria for listing queue items. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub statuses: Vec<QueueStatus>,
    pub recipient_id: Option<RecipientId>,
    pub campaign_id: Option<CampaignId>,
    pub limit: Option<usize>,
}

impl ItemFilter {
    #[must_use]
    pub fn with_status(status: QueueStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, item: &QueueItem) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&item.status))
            && self.recipient_id.is_none_or(|id| item.recipient_id == id)
            && self.campaign_id.is_none_or(|id| item.campaign_id == Some(id))
    }
}
