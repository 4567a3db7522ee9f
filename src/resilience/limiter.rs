//! Token-bucket rate limiting keyed by operation category.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Capacity and refill rate of one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum tokens (and the initial fill)
    pub capacity: u32,
    /// Tokens added per second; `0` makes the bucket a per-invocation budget
    #[serde(default)]
    pub refill_per_sec: f64,
}

impl BucketConfig {
    /// Bucket that never refills
    pub const fn fixed(capacity: u32) -> Self {
        Self {
            capacity,
            refill_per_sec: 0.0,
        }
    }

    /// Bucket refilling at `refill_per_sec`
    pub const fn refilling(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }
}

/// Answer to a non-blocking acquire
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquire {
    /// A token was taken
    Granted,
    /// No token now; one will be available after the delay
    RetryAfter(Duration),
    /// No token and the bucket never refills
    Exhausted,
}

#[derive(Debug)]
struct Bucket {
    config: BucketConfig,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(config: BucketConfig, now: Instant) -> Self {
        Self {
            config,
            tokens: f64::from(config.capacity),
            last_refill: now,
        }
    }

    fn take(&mut self, now: Instant) -> Acquire {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 && self.config.refill_per_sec > 0.0 {
            self.tokens = elapsed
                .mul_add(self.config.refill_per_sec, self.tokens)
                .min(f64::from(self.config.capacity));
        }
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Acquire::Granted;
        }
        if self.config.refill_per_sec <= 0.0 || self.config.capacity == 0 {
            return Acquire::Exhausted;
        }
        let missing = 1.0 - self.tokens;
        Acquire::RetryAfter(Duration::from_secs_f64(missing / self.config.refill_per_sec))
    }
}

/// Rate limiter over named buckets
///
/// Categories without a configured bucket are unlimited. Refill and take
/// happen under one lock so concurrent callers never double-spend a token.
#[derive(Debug, Default)]
pub struct RateLimiter {
    configs: HashMap<String, BucketConfig>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Limiter with the given per-category buckets
    pub fn new(configs: HashMap<String, BucketConfig>) -> Self {
        Self {
            configs,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter that grants everything
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Non-blocking acquire against an explicit clock reading
    pub fn try_acquire_at(&self, category: &str, now: Instant) -> Acquire {
        let Some(config) = self.configs.get(category) else {
            return Acquire::Granted;
        };
        let Ok(mut buckets) = self.buckets.lock() else {
            // fail closed
            return Acquire::Exhausted;
        };
        buckets
            .entry(category.to_string())
            .or_insert_with(|| Bucket::new(*config, now))
            .take(now)
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self, category: &str) -> bool {
        self.try_acquire_at(category, Instant::now()) == Acquire::Granted
    }

    /// Take a token, sleeping until one refills
    ///
    /// Fails with [`Error::RateLimited`] when the bucket is exhausted for good.
    pub async fn acquire(&self, category: &str) -> Result<()> {
        loop {
            match self.try_acquire_at(category, Instant::now()) {
                Acquire::Granted => return Ok(()),
                Acquire::RetryAfter(delay) => {
                    debug!(category, delay_ms = delay.as_millis(), "rate limited, waiting");
                    tokio::time::sleep(delay).await;
                }
                Acquire::Exhausted => {
                    return Err(Error::RateLimited {
                        category: category.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(category: &str, config: BucketConfig) -> RateLimiter {
        RateLimiter::new([(category.to_string(), config)].into_iter().collect())
    }

    #[test]
    fn unconfigured_category_is_unlimited() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..1000 {
            assert!(limiter.try_acquire("anything"));
        }
    }

    #[test]
    fn fixed_bucket_exhausts() {
        let limiter = limiter("merge-write", BucketConfig::fixed(2));
        let now = Instant::now();
        assert_eq!(limiter.try_acquire_at("merge-write", now), Acquire::Granted);
        assert_eq!(limiter.try_acquire_at("merge-write", now), Acquire::Granted);
        assert_eq!(limiter.try_acquire_at("merge-write", now), Acquire::Exhausted);
        let later = now + Duration::from_secs(3600);
        assert_eq!(limiter.try_acquire_at("merge-write", later), Acquire::Exhausted);
    }

    #[test]
    fn refilling_bucket_recovers_over_time() {
        let limiter = limiter("vcs-read", BucketConfig::refilling(1, 2.0));
        let now = Instant::now();
        assert_eq!(limiter.try_acquire_at("vcs-read", now), Acquire::Granted);

        match limiter.try_acquire_at("vcs-read", now) {
            Acquire::RetryAfter(delay) => assert!(delay <= Duration::from_millis(500)),
            other => panic!("expected RetryAfter, got {other:?}"),
        }

        let later = now + Duration::from_millis(600);
        assert_eq!(limiter.try_acquire_at("vcs-read", later), Acquire::Granted);
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let limiter = limiter("c", BucketConfig::refilling(2, 100.0));
        let now = Instant::now();
        let later = now + Duration::from_secs(60);
        assert_eq!(limiter.try_acquire_at("c", now), Acquire::Granted);
        assert_eq!(limiter.try_acquire_at("c", later), Acquire::Granted);
        assert_eq!(limiter.try_acquire_at("c", later), Acquire::Granted);
        assert!(matches!(
            limiter.try_acquire_at("c", later),
            Acquire::RetryAfter(_)
        ));
    }

    #[tokio::test]
    async fn acquire_reports_exhaustion() {
        let limiter = limiter("merge-write", BucketConfig::fixed(0));
        let err = limiter.acquire("merge-write").await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { category } if category == "merge-write"));
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let limiter = limiter("fast", BucketConfig::refilling(1, 200.0));
        limiter.acquire("fast").await.unwrap();
        limiter.acquire("fast").await.unwrap();
    }
}
