//! Retry policy with exponential backoff and jitter

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::{Error, Result};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Random extra delay as a fraction of the computed delay, in [0, 1]
    pub jitter: f64,
    /// Added to the delay when the provider reports a rate limit
    pub rate_limit_penalty: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::embedding()
    }
}

impl RetryPolicy {
    /// Five attempts, delays doubling from 4s up to 60s
    pub fn embedding() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
            rate_limit_penalty: Duration::from_secs(2),
        }
    }

    /// Three attempts, delays doubling from 1s up to 10s
    pub fn completion() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
            rate_limit_penalty: Duration::from_secs(2),
        }
    }

    /// A single attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::completion()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_rate_limit_penalty(mut self, penalty: Duration) -> Self {
        self.rate_limit_penalty = penalty;
        self
    }

    /// Delay after the given failed attempt (1-based), before jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = 1.0 + self.jitter * rand::thread_rng().gen_range(0.0..1.0);
        delay.mul_f64(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts are exhausted.
    ///
    /// Non-retryable errors are returned unchanged. A retryable error on the
    /// last attempt is reported as `Error::Provider`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let mut delay = self.jittered(self.backoff(attempt));
                    if matches!(e, Error::RateLimited(_)) {
                        delay += self.rate_limit_penalty;
                    }
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(Error::Provider(format!(
                        "{} failed after {} attempts: {}",
                        operation, attempt, e
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
