//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Calculate the delay to wait after `attempt` failed, before the next try.
///
/// `attempt` is 1-indexed: the delay after the first failure uses exponent 0,
/// so it equals `base_delay`. The computed value is clamped to `max_delay`.
/// With jitter enabled the result is drawn uniformly from `[d/2, d]`.
pub fn calculate_backoff<R: Rng + ?Sized>(
    attempt: u32,
    config: &RetryConfig,
    rng: &mut R,
) -> Duration {
    let computed = computed_delay(attempt, config);
    if !config.jitter || computed.is_zero() {
        return computed;
    }

    let upper = computed.as_nanos() as f64;
    let jittered = rng.gen_range(upper / 2.0..=upper);
    Duration::from_nanos(jittered.round() as u64)
}

/// The un-jittered delay: `min(base × multiplier^(attempt-1), max_delay)`.
pub fn computed_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base = config.base_delay().as_nanos() as f64;
    let mut nanos = base * config.backoff_multiplier.powi(exponent);

    if let Some(max) = config.max_delay() {
        nanos = nanos.min(max.as_nanos() as f64);
    }
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return Duration::from_nanos(u64::MAX);
    }

    Duration::from_nanos(nanos.max(0.0) as u64)
}
