//! Retry controller for network-dependent operations.
//!
//! Only transient failures are retried; permanent failures propagate on
//! first sight. Backoff is exponential with full jitter, and every
//! attempt first pays the rate limiter's minimum inter-request delay so
//! the request rate stays bounded even on the happy path.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ScraperConfig;
use crate::error::Result;
use crate::scraper::RateLimiter;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per operation
    pub max_retries: u32,
    /// Backoff delay before the first re-attempt
    pub base_delay: Duration,
    /// Backoff delay cap
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn from_scraper_config(config: &ScraperConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Backoff for the given failed attempt (1-based):
    /// `min(max_delay, base_delay * 2^(attempt-1))`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Backoff plus uniform jitter in `[0, delay]`, so concurrent
    /// sessions never fall into a synchronized retry storm.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        delay + delay.mul_f64(rand::rng().random_range(0.0..=1.0))
    }
}

/// Run an operation with bounded retry and exponential backoff.
///
/// The classified failure propagates after `max_retries` transient
/// attempts, or immediately on a permanent failure; it is never
/// swallowed into a default value.
pub async fn execute<T, F, Fut>(
    config: &RetryConfig,
    limiter: &RateLimiter,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_retries.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        // Politeness floor, decoupled from backoff: paid on every
        // attempt, successful or not.
        limiter.acquire().await;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt, "succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    "permanent failure, not retrying"
                );
                return Err(e);
            }
            Err(e) if attempt >= attempts => {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %e,
                    "transient failure, retries exhausted"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = config.jittered_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    ?delay,
                    "transient failure, backing off"
                );
                sleep(delay).await;
            }
        }
    }
}
