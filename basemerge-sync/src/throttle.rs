//! Write throttling: a token bucket in front of every batch, and exponential
//! backoff when the store answers `Throttled`.

use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use basemerge_core::config::{RateLimitConfig, RetryConfig};
use basemerge_core::StoreError;

// ---------------------------------------------------------------------------
// Token bucket
// ---------------------------------------------------------------------------

/// Classic token bucket: `capacity` tokens, refilled continuously at `rate`
/// tokens per second.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(rate_per_second: u32, capacity: u32) -> Self {
        Self::starting_at(rate_per_second, capacity, Instant::now())
    }

    fn starting_at(rate_per_second: u32, capacity: u32, now: Instant) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            rate: f64::from(rate_per_second.max(1)),
            tokens: capacity,
            refilled_at: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.refilled_at = now;
    }

    /// Take one token at `now`, or report how long until one is available.
    pub fn try_acquire_at(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        }
    }

    /// Block until a token is available, then take it.
    pub fn acquire(&mut self) {
        loop {
            match self.try_acquire_at(Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    tracing::debug!("rate limit: waiting {:?}", wait);
                    std::thread::sleep(wait);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff for throttled store calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.base_delay_ms))
            .with_multiplier(self.config.backoff_multiplier)
            .with_max_interval(Duration::from_millis(self.config.max_delay_ms))
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Delays between successive attempts, in order. There are
    /// `max_attempts - 1` of them.
    pub fn delays(&self) -> Vec<Duration> {
        let mut schedule = self.schedule();
        (1..self.config.max_attempts.max(1))
            .filter_map(|_| schedule.next_backoff())
            .collect()
    }

    /// Run `op`, retrying while it fails with `StoreError::Throttled` and
    /// attempts remain. A `retry_after` hint from the store overrides the
    /// computed delay.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;
        let result = backoff::retry_notify(
            self.schedule(),
            || {
                attempt += 1;
                match op() {
                    Ok(value) => Ok(value),
                    Err(StoreError::Throttled { retry_after }) if attempt < max_attempts => {
                        let err = StoreError::Throttled { retry_after };
                        Err(match retry_after {
                            Some(after) => backoff::Error::retry_after(err, after),
                            None => backoff::Error::transient(err),
                        })
                    }
                    Err(err) => Err(backoff::Error::permanent(err)),
                }
            },
            |_err: StoreError, wait: Duration| {
                tracing::warn!("store throttled; retrying in {:?}", wait);
            },
        );
        result.map_err(|err| match err {
            backoff::Error::Permanent(err) => err,
            backoff::Error::Transient { err, .. } => err,
        })
    }
}

// ---------------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------------

/// Rate limiter and retry policy applied to each write batch.
#[derive(Debug, Clone)]
pub struct Throttle {
    bucket: Option<TokenBucket>,
    retry: RetryPolicy,
}

impl Throttle {
    pub fn new(rate_limit: &RateLimitConfig, retry: &RetryConfig) -> Self {
        let bucket = rate_limit
            .enabled
            .then(|| TokenBucket::new(rate_limit.requests_per_second, rate_limit.burst_capacity));
        Self {
            bucket,
            retry: RetryPolicy::new(retry.clone()),
        }
    }

    /// No rate limit and no retries.
    pub fn unlimited() -> Self {
        Self {
            bucket: None,
            retry: RetryPolicy::new(RetryConfig::disabled()),
        }
    }

    /// Wait for the rate limiter, then run `op` under the retry policy.
    pub fn call<T, F>(&mut self, op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        if let Some(bucket) = self.bucket.as_mut() {
            bucket.acquire();
        }
        self.retry.run(op)
    }
}
