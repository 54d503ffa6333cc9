//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retrying after the 0-based `attempt` failed:
/// `base * 2^attempt + uniform(0, jitter_ceiling)`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, jitter_ceiling_ms: u64) -> Duration {
    let exponential = 2u64.saturating_pow(attempt);
    let delay_ms = base_ms.saturating_mul(exponential);

    let jitter = if jitter_ceiling_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_ceiling_ms)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter))
}
