//! Token-bucket rate limiting
//!
//! The bucket holds at most `capacity` tokens and refills continuously at
//! `refill_rate` tokens per second. Each request spends one token (or more,
//! for expensive calls); when the bucket is short the caller sleeps for
//! exactly the time needed to refill the deficit and re-checks.
//!
//! Time comes from [`tokio::time::Instant`], so throttling is virtual (and
//! deterministic) under a paused test clock.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::config::{DEFAULT_BURST_CAPACITY, DEFAULT_REQUESTS_PER_MINUTE};

/// Float slack when comparing token counts
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket
///
/// Cloning is cheap and every clone draws from the same bucket.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    bucket: Arc<Mutex<Bucket>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_minute(DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_BURST_CAPACITY)
    }
}

impl RateLimiter {
    /// Create a full bucket
    ///
    /// # Arguments
    /// * `capacity` - Maximum burst, in tokens (at least 1)
    /// * `refill_rate` - Tokens added per second (must be positive)
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_rate: refill_rate.max(f64::MIN_POSITIVE),
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Bucket sustaining `requests_per_minute` with bursts of `burst`
    pub fn per_minute(requests_per_minute: u32, burst: u32) -> Self {
        Self::new(burst, f64::from(requests_per_minute) / 60.0)
    }

    /// Maximum tokens
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Tokens currently available
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Wait until `cost` tokens are available, then take them
    ///
    /// A cost above capacity is clamped to capacity. Never fails. The
    /// future is cancel-safe: dropping it while waiting takes no tokens.
    ///
    /// # Returns
    /// Time spent waiting
    pub async fn acquire(&self, cost: u32) -> Duration {
        let cost = f64::from(cost).min(self.capacity);
        let started = Instant::now();

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);

                if bucket.tokens + TOKEN_EPSILON >= cost {
                    bucket.tokens = (bucket.tokens - cost).max(0.0);
                    let available = bucket.tokens;
                    drop(bucket);

                    let waited = started.elapsed();
                    crate::metrics::record_rate_limit_wait(waited, available);
                    return waited;
                }

                let deficit = cost - bucket.tokens;
                Duration::from_nanos((deficit / self.refill_rate * 1e9).ceil() as u64)
                    .max(Duration::from_millis(1))
            };

            debug!(
                wait_ms = wait.as_millis() as u64,
                "Rate limiter waiting for tokens"
            );
            sleep(wait).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        bucket.last_refill = now;
    }
}
