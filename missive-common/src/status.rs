use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{ParseError, TemplateKind};

/// Lifecycle state of a queue item.
///
/// `pending -> processing -> {sent | pending (rescheduled) | failed}` and
/// `pending | processing -> cancelled`. `Sent` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Sent,
        Self::Failed,
        Self::Cancelled,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Cancelled)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseError::QueueStatus(s.to_string()))
    }
}

/// Subscriber account state as reported by the recipient directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecipientStatus {
    Active,
    PendingVerification,
    Unsubscribed,
    Bounced,
    Inactive,
}

impl RecipientStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PendingVerification => "pending_verification",
            Self::Unsubscribed => "unsubscribed",
            Self::Bounced => "bounced",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipientStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "pending_verification" | "pending" => Ok(Self::PendingVerification),
            "unsubscribed" => Ok(Self::Unsubscribed),
            "bounced" => Ok(Self::Bounced),
            "inactive" => Ok(Self::Inactive),
            _ => Err(ParseError::RecipientStatus(s.to_string())),
        }
    }
}

/// How often a subscriber wants to receive digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    pub const ALL: [Self; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    /// Maximum number of letters bundled into one digest of this cadence.
    #[must_use]
    pub const fn items_per_digest(self) -> usize {
        match self {
            Self::Daily => 1,
            Self::Weekly => 5,
            Self::Monthly => 10,
        }
    }

    #[must_use]
    pub const fn template_kind(self) -> TemplateKind {
        match self {
            Self::Daily => TemplateKind::DailyDigest,
            Self::Weekly => TemplateKind::WeeklyDigest,
            Self::Monthly => TemplateKind::MonthlyDigest,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(ParseError::Cadence(s.to_string())),
        }
    }
}
