//! Exponential backoff

use chrono::Duration;

/// Delay before the next attempt after the `failure`-th failure (1-indexed).
///
/// # Formula
/// `delay = min(base * factor^(failure - 1), cap)` minutes
///
/// With the defaults (base 5, factor 3, cap 180) failures 1..=6 wait
/// 5, 15, 45, 135, 180 and 180 minutes.
#[must_use]
pub fn backoff_delay(failure: u32, base_minutes: u64, factor: u64, cap_minutes: u64) -> Duration {
    let exponent = failure.saturating_sub(1);
    let multiplier = factor.checked_pow(exponent).unwrap_or(u64::MAX);
    let minutes = base_minutes.saturating_mul(multiplier).min(cap_minutes);

    i64::try_from(minutes)
        .ok()
        .and_then(Duration::try_minutes)
        .unwrap_or(Duration::MAX)
}
