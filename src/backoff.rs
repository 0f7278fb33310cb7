// backoff.rs - pure, stateless retry delay math.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

use crate::config::EngineConfig;

/// `delay(retry_count) = min(BASE * 2^retry_count + jitter, MAX)`.
///
/// Jitter is sampled fresh on each call and is the only source of
/// non-determinism in this module.
pub fn delay(retry_count: u32, config: &EngineConfig) -> Duration {
    let exp = 2u64.saturating_pow(retry_count);
    let base_component = config.base_delay.as_millis() as u64 * exp;

    let jitter_ms = if config.max_jitter.is_zero() {
        0
    } else {
        rand::thread_rng().gen_range(0..=config.max_jitter.as_millis() as u64)
    };

    let total = base_component.saturating_add(jitter_ms);
    Duration::from_millis(total.min(config.max_delay.as_millis() as u64))
}

/// `eligible_at(last_attempt, retry_count) = last_attempt + delay(retry_count - 1)`.
///
/// Items with `retry_count = 0` have never been attempted and are
/// immediately eligible regardless of `last_attempt`.
pub fn eligible_at(
    last_attempt: DateTime<Utc>,
    retry_count: u32,
    config: &EngineConfig,
) -> DateTime<Utc> {
    if retry_count == 0 {
        return last_attempt;
    }

    let d = delay(retry_count - 1, config);
    last_attempt + chrono::Duration::from_std(d).unwrap_or_default()
}

/// Whether a `retry_count = 0` item is always immediately eligible.
pub fn is_immediately_eligible(retry_count: u32) -> bool {
    retry_count == 0
}
