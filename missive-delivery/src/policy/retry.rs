//! Retry policy for failed sends.
//!
//! Keeps the backoff arithmetic and the attempt ceiling in one place so the
//! queue only asks "retry or dead-letter, and when".

use std::{fmt, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use missive_common::clock::saturating_add;
use serde::{Deserialize, Serialize};

use crate::queue::retry::backoff_delay;

/// Replaces the computed delay. Receives the failure number (1-indexed) and
/// the delay the policy would otherwise use.
#[derive(Clone)]
pub struct BackoffOverride(Arc<dyn Fn(u32, Duration) -> Duration + Send + Sync>);

impl BackoffOverride {
    pub fn new(f: impl Fn(u32, Duration) -> Duration + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for BackoffOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BackoffOverride(..)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts before a job is dead-lettered.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure (in minutes).
    ///
    /// Default: 5
    #[serde(default = "defaults::base_delay_minutes")]
    pub base_delay_minutes: u64,

    /// Multiplier applied per additional failure.
    ///
    /// Default: 3
    #[serde(default = "defaults::backoff_factor")]
    pub backoff_factor: u64,

    /// Upper bound on any single delay (in minutes).
    ///
    /// Default: 180
    #[serde(default = "defaults::max_delay_minutes")]
    pub max_delay_minutes: u64,

    #[serde(skip)]
    pub backoff_override: Option<BackoffOverride>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_minutes: defaults::base_delay_minutes(),
            backoff_factor: defaults::backoff_factor(),
            max_delay_minutes: defaults::max_delay_minutes(),
            backoff_override: None,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_override(mut self, hook: BackoffOverride) -> Self {
        self.backoff_override = Some(hook);
        self
    }

    /// `true` while `attempts` is below `max_attempts`.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    #[must_use]
    pub const fn remaining_attempts(&self, attempts: u32) -> u32 {
        self.max_attempts.saturating_sub(attempts)
    }

    /// Delay to wait after the `failure`-th failure (1-indexed).
    #[must_use]
    pub fn delay_for(&self, failure: u32) -> Duration {
        let computed = backoff_delay(
            failure,
            self.base_delay_minutes,
            self.backoff_factor,
            self.max_delay_minutes,
        );

        self.backoff_override
            .as_ref()
            .map_or(computed, |hook| (hook.0)(failure, computed))
    }

    #[must_use]
    pub fn next_attempt_at(&self, now: DateTime<Utc>, failure: u32) -> DateTime<Utc> {
        saturating_add(now, self.delay_for(failure))
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_delay_minutes() -> u64 {
        5
    }

    pub const fn backoff_factor() -> u64 {
        3
    }

    pub const fn max_delay_minutes() -> u64 {
        180 // 3 hours
    }
}
