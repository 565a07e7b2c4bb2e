//! Sleep-and-retry orchestration around the limiter.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, RateLimitError, Result};
use crate::ratelimit::{BucketKey, RateLimiter};

/// How a caller retries requests refused by the limiter or throttled by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    max_wait: Duration,
    jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_wait: Duration::from_secs(300),
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` attempts in total (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Give up instead of sleeping when a retry-after exceeds `max_wait`.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Add up to `jitter` of random delay to each wait.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Longest wait this policy will sleep for.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Run `op` under the limiter, retrying on rate limit errors.
    ///
    /// Each attempt first takes a slot from `limiter` for `key`; a denial or
    /// an [`Error::RateLimited`] returned by `op` waits the error's
    /// retry-after and tries again. Any other error is returned immediately.
    /// After the last attempt, or when the required wait exceeds
    /// [`max_wait`](Self::max_wait), the last rate limit error is returned.
    pub async fn execute<T, F, Fut>(&self, limiter: &RateLimiter, key: &BucketKey, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match limiter.check_and_record(key) {
                Ok(()) => op().await,
                Err(err) => Err(Error::RateLimited(err)),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(Error::RateLimited(err)) => err,
                Err(other) => return Err(other),
            };

            if attempt >= self.max_attempts || err.retry_after() > self.max_wait {
                warn!(
                    bucket = %key,
                    attempts = attempt,
                    retry_after_secs = err.retry_after_secs(),
                    server_reported = err.is_server_reported(),
                    "Giving up on rate limited request"
                );
                return Err(Error::RateLimited(err));
            }

            let delay = self.delay_for(&err);
            debug!(
                bucket = %key,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Rate limited, waiting before retry"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// The wait applied after `err`, including jitter, capped at `max_wait`.
    pub fn delay_for(&self, err: &RateLimitError) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        (err.retry_after() + jitter).min(self.max_wait)
    }
}
