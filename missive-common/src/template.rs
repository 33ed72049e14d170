use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Cadence, ParseError};

/// Closed set of email templates the platform knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TemplateKind {
    Welcome,
    Verification,
    DailyDigest,
    WeeklyDigest,
    MonthlyDigest,
    Reconsent,
    CustomCampaign,
    AllCaughtUp,
    AutomatedNotice,
}

impl TemplateKind {
    pub const ALL: [Self; 9] = [
        Self::Welcome,
        Self::Verification,
        Self::DailyDigest,
        Self::WeeklyDigest,
        Self::MonthlyDigest,
        Self::Reconsent,
        Self::CustomCampaign,
        Self::AllCaughtUp,
        Self::AutomatedNotice,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Verification => "verification",
            Self::DailyDigest => "daily_digest",
            Self::WeeklyDigest => "weekly_digest",
            Self::MonthlyDigest => "monthly_digest",
            Self::Reconsent => "reconsent",
            Self::CustomCampaign => "custom_campaign",
            Self::AllCaughtUp => "all_caught_up",
            Self::AutomatedNotice => "automated_notice",
        }
    }

    /// The digest cadence this template belongs to, if it is a digest.
    #[must_use]
    pub const fn cadence(self) -> Option<Cadence> {
        match self {
            Self::DailyDigest => Some(Cadence::Daily),
            Self::WeeklyDigest => Some(Cadence::Weekly),
            Self::MonthlyDigest => Some(Cadence::Monthly),
            _ => None,
        }
    }

    /// Digests and their "all caught up" fallback.
    #[must_use]
    pub const fn is_digest_family(self) -> bool {
        self.cadence().is_some() || matches!(self, Self::AllCaughtUp)
    }

    /// Verification mail goes to recipients who have not verified yet.
    #[must_use]
    pub const fn requires_verified_recipient(self) -> bool {
        !matches!(self, Self::Verification)
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| ParseError::TemplateKind(s.to_string()))
    }
}
