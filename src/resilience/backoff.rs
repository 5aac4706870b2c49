//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retry `attempt` (1-based): exponential growth from
/// `base_ms`, capped at `max_ms`, with up to 10% random jitter so
/// synchronized clients do not retry in lockstep.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
    let capped = exponential.min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}
