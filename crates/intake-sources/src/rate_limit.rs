//! Token-bucket rate limiting for outbound fetches.

use std::time::{Duration, Instant};

use intake_core::config::RateLimitConfig;

/// A token bucket: `capacity` tokens of burst, refilled continuously at
/// `refill_per_sec`. The bucket starts full.
#[derive(Debug)]
pub struct TokenBucket {
    capacity:       f64,
    refill_per_sec: f64,
    tokens:         f64,
    last_refill:    Instant,
}

impl TokenBucket {
    /// Build a bucket from source configuration.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.capacity.max(1));
        Self {
            capacity,
            refill_per_sec: config.refill_per_sec.max(f64::MIN_POSITIVE),
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take a token without waiting. Returns false when the bucket is empty.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Take a token, sleeping until the refill provides one.
    pub async fn acquire(&mut self) {
        loop {
            if self.try_acquire() {
                return;
            }
            let deficit = 1.0 - self.tokens;
            let wait = Duration::from_secs_f64(deficit / self.refill_per_sec);
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: u32, refill_per_sec: f64) -> RateLimitConfig {
        RateLimitConfig {
            capacity,
            refill_per_sec,
        }
    }

    #[test]
    fn burst_up_to_capacity() {
        let mut bucket = TokenBucket::new(&config(3, 1.0));
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test]
    async fn over_capacity_call_waits_for_refill() {
        let mut bucket = TokenBucket::new(&config(2, 20.0));
        bucket.acquire().await;
        bucket.acquire().await;

        // The (capacity + 1)-th acquire has to wait for one token: 50ms at
        // 20 tokens/sec.
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn refill_restores_burst() {
        let mut bucket = TokenBucket::new(&config(1, 50.0));
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(bucket.try_acquire());
    }
}
