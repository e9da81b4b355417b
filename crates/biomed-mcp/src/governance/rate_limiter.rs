//! Token bucket rate limiter.
//!
//! Tokens refill lazily from elapsed time on every call; there is no
//! background timer. Waiters sleep for the computed deficit and then re-check,
//! so ordering under contention is approximate rather than FIFO.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimiterConfig;
use crate::error::{AdmissionError, ConfigError};

#[derive(Debug)]
struct Bucket {
    available: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * refill_rate).min(capacity);
        self.last_refill = now;
    }
}

/// Shared token bucket guarding calls to one upstream resource.
#[derive(Debug)]
pub struct TokenBucketRateLimiter {
    capacity: f64,
    refill_rate: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucketRateLimiter {
    /// Create a full bucket.
    ///
    /// # Errors
    ///
    /// Returns error if `capacity` or `refill_rate` is not a positive finite number.
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self, ConfigError> {
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(ConfigError::invalid("capacity", "must be positive and finite"));
        }
        if !(refill_rate.is_finite() && refill_rate > 0.0) {
            return Err(ConfigError::invalid("refill_rate", "must be positive and finite"));
        }
        Ok(Self {
            capacity,
            refill_rate,
            bucket: Mutex::new(Bucket { available: capacity, last_refill: Instant::now() }),
        })
    }

    /// Create a bucket from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is out of range.
    pub fn from_config(config: &RateLimiterConfig) -> Result<Self, ConfigError> {
        Self::new(config.capacity, config.refill_rate)
    }

    /// Maximum tokens held.
    #[must_use]
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    #[must_use]
    pub const fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Wait until `tokens` are available, then take them.
    ///
    /// Cancelling the returned future never consumes tokens.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::CostExceedsCapacity`] if `tokens` could never fit.
    pub async fn acquire(&self, tokens: u32) -> Result<(), AdmissionError> {
        let needed = f64::from(tokens);
        if needed > self.capacity {
            return Err(AdmissionError::CostExceedsCapacity { requested: tokens, capacity: self.capacity });
        }

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                bucket.refill(self.capacity, self.refill_rate, Instant::now());
                if bucket.available >= needed {
                    bucket.available -= needed;
                    return Ok(());
                }
                self.deficit_wait(needed - bucket.available)
            };
            tracing::trace!(tokens, wait_ms = wait.as_millis() as u64, "Waiting for token refill");
            tokio::time::sleep(wait).await;
        }
    }

    /// Take `tokens` only if they are available right now.
    pub async fn try_acquire(&self, tokens: u32) -> bool {
        let needed = f64::from(tokens);
        let mut bucket = self.bucket.lock().await;
        bucket.refill(self.capacity, self.refill_rate, Instant::now());
        if bucket.available >= needed {
            bucket.available -= needed;
            true
        } else {
            false
        }
    }

    /// Snapshot of available tokens after applying refill.
    pub async fn get_available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(self.capacity, self.refill_rate, Instant::now());
        bucket.available
    }

    fn deficit_wait(&self, deficit: f64) -> Duration {
        // Floor of 1ms keeps float residue from spinning the loop.
        Duration::from_secs_f64(deficit / self.refill_rate).max(Duration::from_millis(1))
    }
}
