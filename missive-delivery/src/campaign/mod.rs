//! Batch orchestration for digests and bulk campaigns.
//!
//! Both orchestrators work one page at a time and continue through
//! [`TickScheduler`](crate::scheduler::TickScheduler) rows, so a long run is
//! a chain of short ticks that survives restarts.

pub mod bulk;
pub mod digest;
pub mod token;

use serde::Deserialize;

pub use bulk::{BatchOutcome, CampaignOrchestrator, NewCampaign};
pub use digest::{DigestOrchestrator, DigestPageReport, DigestSchedule};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CampaignConfig {
    /// Recipients per bulk campaign batch.
    ///
    /// Default: 200
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    /// Recipients per digest page.
    ///
    /// Default: 100
    #[serde(default = "defaults::digest_page_size")]
    pub digest_page_size: usize,

    /// Only send digests to recipients who confirmed consent.
    ///
    /// Default: true
    #[serde(default = "defaults::require_consent")]
    pub require_consent: bool,

    /// Pause between consecutive batches (in seconds).
    ///
    /// Default: 5
    #[serde(default = "defaults::batch_delay_secs")]
    pub batch_delay_secs: u64,

    /// Newest letters considered when choosing digest content.
    ///
    /// Default: 50
    #[serde(default = "defaults::content_pool")]
    pub content_pool: usize,

    /// Default: 4
    #[serde(default = "defaults::digest_priority")]
    pub digest_priority: u8,

    /// Default: 3
    #[serde(default = "defaults::campaign_priority")]
    pub campaign_priority: u8,

    #[serde(default)]
    pub digest_schedule: DigestSchedule,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::batch_size(),
            digest_page_size: defaults::digest_page_size(),
            require_consent: defaults::require_consent(),
            batch_delay_secs: defaults::batch_delay_secs(),
            content_pool: defaults::content_pool(),
            digest_priority: defaults::digest_priority(),
            campaign_priority: defaults::campaign_priority(),
            digest_schedule: DigestSchedule::default(),
        }
    }
}

impl CampaignConfig {
    pub(crate) fn batch_delay(&self) -> chrono::Duration {
        i64::try_from(self.batch_delay_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

mod defaults {
    pub const fn batch_size() -> usize {
        200
    }

    pub const fn digest_page_size() -> usize {
        100
    }

    pub const fn require_consent() -> bool {
        true
    }

    pub const fn batch_delay_secs() -> u64 {
        5
    }

    pub const fn content_pool() -> usize {
        50
    }

    pub const fn digest_priority() -> u8 {
        4
    }

    pub const fn campaign_priority() -> u8 {
        3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_ron() {
        let config: CampaignConfig = ron::from_str("()").unwrap();
        assert_eq!(config.batch_size, 200);
        assert_eq!(config.digest_page_size, 100);
        assert!(config.require_consent);
        assert_eq!(config.batch_delay().num_seconds(), 5);
        assert!(config.digest_schedule.enabled);
        assert_eq!(config.digest_schedule.weekly_secs, 604_800);
    }
}
