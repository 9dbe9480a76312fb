//! Run-level retry/backoff, SPEC_FULL.md §4.7.
//!
//! A deliberately simplified, deterministic derivative of
//! `reliability/retry.rs`'s `RetryPolicy`: the teacher's policy exposes a
//! configurable coefficient, max interval, and jitter fraction; SPEC_FULL.md
//! §4.7 mandates one fixed, jitterless formula
//! (`min(1000 * 2^(retryCount-1), 30000)` ms), so that richer struct is not
//! carried over here. `max_retries` still comes from the definition
//! (`crate::domain::RetryPolicy`), same as the teacher's `max_attempts`.

use std::time::Duration;

const BASE_MS: u64 = 1000;
const CAP_MS: u64 = 30_000;

/// Delay before the retry that will bring the instance's `retry_count`
/// from `retry_count - 1` to `retry_count`. `retry_count` is 1-based (the
/// count *after* incrementing).
pub fn backoff_delay(retry_count: u32) -> Duration {
    if retry_count == 0 {
        return Duration::ZERO;
    }
    let exponent = retry_count.saturating_sub(1);
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let scaled = BASE_MS.saturating_mul(factor);
    Duration::from_millis(scaled.min(CAP_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_spec_formula() {
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(6), Duration::from_millis(30_000)); // capped
        assert_eq!(backoff_delay(0), Duration::ZERO);
    }

    #[test]
    fn never_exceeds_cap_for_large_retry_counts() {
        assert_eq!(backoff_delay(100), Duration::from_millis(30_000));
    }
}
