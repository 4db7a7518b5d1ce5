//! Backoff between attempts of one request.

use std::time::Duration;

use rand::Rng;
use switchboard_core::RetryPolicy;

/// Delay before retry number `retry` (1 for the first retry).
///
/// Exponential from `base_delay`, capped at `max_delay`, with up to 25%
/// random jitter, and never shorter than a server-supplied `retry_after`.
pub fn backoff_delay(policy: &RetryPolicy, retry: u32, retry_after: Option<Duration>) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    let exponential = policy.base_delay.saturating_mul(factor).min(policy.max_delay);

    let spread = u64::try_from(exponential.as_millis() / 4).unwrap_or(u64::MAX);
    let jitter = if spread == 0 {
        0
    } else {
        rand::rng().random_range(0..=spread)
    };
    let delay = (exponential + Duration::from_millis(jitter)).min(policy.max_delay);

    match retry_after {
        Some(requested) => delay.max(requested),
        None => delay,
    }
}
