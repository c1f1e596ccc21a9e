//! Exponential backoff with jitter.

use std::time::Duration;

use intake_core::config::RetryConfig;
use rand::Rng;

/// Delay before retry attempt `attempt` (1-based): `base * 2^(attempt-1)`
/// capped at the configured maximum, scaled by a random factor in
/// `[1 - jitter, 1]` so synchronized sources fan out.
#[must_use]
pub fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let raw = retry
        .base_delay_ms
        .saturating_mul(1_u64 << exponent)
        .min(retry.max_delay_ms.max(retry.base_delay_ms));
    let jitter = retry.jitter.clamp(0.0, 1.0);
    let factor = if jitter > 0.0 {
        rand::thread_rng().gen_range((1.0 - jitter)..=1.0)
    } else {
        1.0
    };
    Duration::from_millis((raw as f64 * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry(base: u64, max: u64, jitter: f64) -> RetryConfig {
        RetryConfig {
            base_delay_ms: base,
            max_delay_ms: max,
            jitter,
            max_attempts: 5,
        }
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let config = retry(100, 1_000, 0.0);
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(800));
        assert_eq!(backoff_delay(&config, 5), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(&config, 30), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let config = retry(1_000, 10_000, 0.2);
        for _ in 0..100 {
            let delay = backoff_delay(&config, 1);
            assert!(delay >= Duration::from_millis(800), "delay {delay:?} below jitter floor");
            assert!(delay <= Duration::from_millis(1_000), "delay {delay:?} above base");
        }
    }

    #[test]
    fn huge_attempts_do_not_overflow() {
        let config = retry(u64::MAX / 2, u64::MAX, 0.0);
        let delay = backoff_delay(&config, u32::MAX);
        assert!(delay >= Duration::from_millis(u64::MAX / 2));
    }
}
