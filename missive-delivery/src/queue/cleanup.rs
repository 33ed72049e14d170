//! Retention sweeps.

use chrono::Duration;
use missive_common::{QueueStatus, clock::saturating_sub, internal};
use serde::{Deserialize, Serialize};

use super::EmailQueue;
use crate::DeliveryError;

/// How long each kind of record is kept (in days).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Default: 30
    #[serde(default = "defaults::sent_days")]
    pub sent_days: u32,

    /// Default: 7
    #[serde(default = "defaults::cancelled_days")]
    pub cancelled_days: u32,

    /// Default: 180
    #[serde(default = "defaults::delivery_log_days")]
    pub delivery_log_days: u32,

    /// Default: 90
    #[serde(default = "defaults::tracking_days")]
    pub tracking_days: u32,

    /// Default: 90
    #[serde(default = "defaults::dead_letter_days")]
    pub dead_letter_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            sent_days: defaults::sent_days(),
            cancelled_days: defaults::cancelled_days(),
            delivery_log_days: defaults::delivery_log_days(),
            tracking_days: defaults::tracking_days(),
            dead_letter_days: defaults::dead_letter_days(),
        }
    }
}

mod defaults {
    pub const fn sent_days() -> u32 {
        30
    }

    pub const fn cancelled_days() -> u32 {
        7
    }

    pub const fn delivery_log_days() -> u32 {
        180
    }

    pub const fn tracking_days() -> u32 {
        90
    }

    pub const fn dead_letter_days() -> u32 {
        90
    }
}

/// Rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub sent: usize,
    pub cancelled: usize,
    pub delivery_log: usize,
    pub tracking: usize,
    pub dead_letters: usize,
}

impl CleanupReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.sent + self.cancelled + self.delivery_log + self.tracking + self.dead_letters
    }
}

impl EmailQueue {
    /// Delete everything older than its retention window, then flush the
    /// store.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn cleanup(&self, policy: &RetentionPolicy) -> Result<CleanupReport, DeliveryError> {
        let now = self.now();
        let before = |days: u32| saturating_sub(now, Duration::days(i64::from(days)));
        let store = self.store();

        let report = CleanupReport {
            sent: store
                .purge_items(QueueStatus::Sent, before(policy.sent_days))
                .await?,
            cancelled: store
                .purge_items(QueueStatus::Cancelled, before(policy.cancelled_days))
                .await?,
            delivery_log: store
                .purge_delivery_log(before(policy.delivery_log_days))
                .await?,
            tracking: store.purge_tracking(before(policy.tracking_days)).await?,
            dead_letters: store
                .purge_dead_letters(before(policy.dead_letter_days))
                .await?,
        };

        store.flush().await?;

        if report.total() > 0 {
            internal!(level = INFO, "Cleanup removed {report:?}");
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use missive_common::{RecipientId, TemplateKind};

    use super::*;
    use crate::queue::{EnqueueRequest, tests::queue_with_clock};

    #[test]
    fn test_defaults() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.sent_days, 30);
        assert_eq!(policy.cancelled_days, 7);
        assert_eq!(policy.delivery_log_days, 180);
        assert_eq!(policy.tracking_days, 90);
        assert_eq!(policy.dead_letter_days, 90);
    }

    #[test]
    fn test_partial_ron() {
        let policy: RetentionPolicy = ron::from_str("(sent_days: 1)").unwrap();
        assert_eq!(policy.sent_days, 1);
        assert_eq!(policy.cancelled_days, 7);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_sweeps_only_expired_terminal_items() {
        let (queue, clock) = queue_with_clock();
        let request = || {
            EnqueueRequest::new(RecipientId(1), TemplateKind::Welcome, "Welcome", "<p/>")
        };

        let old_sent = queue.enqueue(request()).await.unwrap();
        queue.claim(&old_sent).await.unwrap();
        queue.mark_sent(&old_sent).await.unwrap();

        let old_cancelled = queue.enqueue(request()).await.unwrap();
        queue.mark_cancelled(&old_cancelled, "test").await.unwrap();

        let old_pending = queue.enqueue(request()).await.unwrap();

        clock.advance(Duration::days(10));
        let report = queue.cleanup(&RetentionPolicy::default()).await.unwrap();
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.sent, 0);

        clock.advance(Duration::days(25));
        let report = queue.cleanup(&RetentionPolicy::default()).await.unwrap();
        assert_eq!(report.sent, 1);

        assert!(queue.get(&old_sent).await.unwrap().is_none());
        assert!(queue.get(&old_cancelled).await.unwrap().is_none());
        assert!(queue.get(&old_pending).await.unwrap().is_some());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_unbounded_retention_keeps_everything() {
        let (queue, clock) = queue_with_clock();
        let id = queue
            .enqueue(EnqueueRequest::new(
                RecipientId(1),
                TemplateKind::Welcome,
                "Welcome",
                "<p/>",
            ))
            .await
            .unwrap();
        queue.mark_cancelled(&id, "test").await.unwrap();
        clock.advance(Duration::days(365));

        let forever = RetentionPolicy {
            sent_days: u32::MAX,
            cancelled_days: u32::MAX,
            delivery_log_days: u32::MAX,
            tracking_days: u32::MAX,
            dead_letter_days: u32::MAX,
        };
        let report = queue.cleanup(&forever).await.unwrap();

        assert_eq!(report.total(), 0);
        assert!(queue.get(&id).await.unwrap().is_some());
    }
}
