//! Error types for the quota governor.

use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::ratelimit::BucketKey;
use crate::retry::parse_retry_after;

/// Longest wait a [`RateLimitError`] carries: one year.
///
/// Server-reported waits beyond this are clamped so absolute retry times stay
/// representable.
pub const MAX_RETRY_AFTER_SECS: u64 = 365 * 86_400;

/// A point in time that a retry wait can be added to.
pub trait RetryTimestamp: Sized + PartialOrd {
    /// `self + wait`, or `None` when the result is out of range.
    fn checked_add_wait(&self, wait: Duration) -> Option<Self>;
}

impl RetryTimestamp for Instant {
    fn checked_add_wait(&self, wait: Duration) -> Option<Self> {
        self.checked_add(wait)
    }
}

impl RetryTimestamp for tokio::time::Instant {
    fn checked_add_wait(&self, wait: Duration) -> Option<Self> {
        self.checked_add(wait)
    }
}

impl RetryTimestamp for SystemTime {
    fn checked_add_wait(&self, wait: Duration) -> Option<Self> {
        self.checked_add(wait)
    }
}

impl RetryTimestamp for DateTime<Utc> {
    fn checked_add_wait(&self, wait: Duration) -> Option<Self> {
        let delta = TimeDelta::from_std(wait).ok()?;
        self.checked_add_signed(delta)
    }
}

/// Errors raised while building or loading a [`RateLimitConfig`](crate::config::RateLimitConfig).
///
/// These are only produced at construction time, never while checking requests.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A limit, interval or size that must be strictly positive was not.
    #[error("Configuration error: {field} must be greater than zero (got {value})")]
    InvalidLimit { field: &'static str, value: i64 },

    /// The daily quota cannot be smaller than the per-minute quota.
    #[error("Configuration error: daily_limit ({daily}) must be >= minute_limit ({minute})")]
    DailyBelowMinute { daily: i64, minute: i64 },

    /// Retry delay was negative.
    #[error("Configuration error: retry_delay must not be negative (got {0})")]
    NegativeRetryDelay(i64),

    /// Settings could not be parsed or deserialized.
    #[error("Configuration error: {0}")]
    Parse(String),

    /// I/O errors while reading a settings file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A request was refused because a quota is exhausted.
///
/// Carries how long the caller must wait before the next attempt is expected
/// to succeed. The wait is fixed at construction; absolute retry times are
/// always derived from a reference time supplied by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RateLimitError {
    message: String,
    retry_after_secs: u64,
    bucket: Option<BucketKey>,
    server_reported: bool,
}

impl RateLimitError {
    /// Create an error with an explicit wait in whole seconds.
    ///
    /// The wait is clamped to [`MAX_RETRY_AFTER_SECS`].
    pub fn new(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self {
            message: message.into(),
            retry_after_secs: retry_after_secs.min(MAX_RETRY_AFTER_SECS),
            bucket: None,
            server_reported: false,
        }
    }

    /// Create an error from a wait duration, rounded up to whole seconds.
    pub fn from_wait(message: impl Into<String>, wait: Duration) -> Self {
        Self::new(message, ceil_secs(wait))
    }

    /// Build an error from a throttle response sent by the remote service.
    ///
    /// `header` is the raw `Retry-After` value, if any. When it is missing or
    /// cannot be parsed, `fallback` (usually the configured retry delay) is used.
    pub fn server_reported(header: Option<&str>, now: DateTime<Utc>, fallback: Duration) -> Self {
        let wait = header
            .and_then(|value| parse_retry_after(value, now))
            .unwrap_or(fallback);
        let mut err = Self::from_wait("Rate limit reported by server", wait);
        err.server_reported = true;
        err
    }

    /// Attach the bucket that was denied.
    pub fn with_bucket(mut self, bucket: BucketKey) -> Self {
        self.bucket = Some(bucket);
        self
    }

    /// Human readable description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// How long to wait before retrying.
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }

    /// How long to wait before retrying, in whole seconds.
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_secs
    }

    /// The bucket that refused the request, if known.
    pub fn bucket(&self) -> Option<&BucketKey> {
        self.bucket.as_ref()
    }

    /// Whether the wait came from the remote service rather than local window state.
    pub fn is_server_reported(&self) -> bool {
        self.server_reported
    }

    /// Absolute time at which a retry becomes permissible, relative to `reference_now`.
    ///
    /// Works with monotonic or wall-clock types (`Instant`, `SystemTime`,
    /// `DateTime<Utc>`). `None` when the sum is out of range for `T`.
    pub fn retry_at<T: RetryTimestamp>(&self, reference_now: T) -> Option<T> {
        reference_now.checked_add_wait(self.retry_after())
    }

    /// Wall-clock retry time, useful when scheduling retries in external systems.
    ///
    /// Saturates at the latest representable UTC time.
    pub fn retry_at_utc(&self, reference_now: DateTime<Utc>) -> DateTime<Utc> {
        self.retry_at(reference_now).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// `true` iff `reference_now >= last_attempt + retry_after`.
    ///
    /// A retry time past the range of `T` is never reached.
    pub fn can_retry_now<T: RetryTimestamp>(&self, last_attempt: T, reference_now: T) -> bool {
        match self.retry_at(last_attempt) {
            Some(at) => reference_now >= at,
            None => false,
        }
    }
}

/// Round a duration up to whole seconds.
pub(crate) fn ceil_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs();
    if wait.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// Main error type for quota governor operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Quota exhausted, locally or as reported by the server
    #[error("Rate limit exceeded: {0}")]
    RateLimited(#[from] RateLimitError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for quota governor operations.
pub type Result<T> = std::result::Result<T, Error>;
