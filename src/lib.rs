//! Quota Governor - client-side rate limiting for API SDKs
//!
//! This crate keeps an SDK within a remote service's per-minute and per-day
//! quotas. A [`RateLimiter`] tracks fixed minute and day windows per bucket,
//! refuses requests that would exceed them, and reports how long to wait
//! through a [`RateLimitError`]. Retry orchestration lives in [`retry`].

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod retry;

pub use config::{RateLimitConfig, RateLimitConfigBuilder, RateLimitSettings};
pub use error::{
    ConfigError, Error, RateLimitError, Result, RetryTimestamp, MAX_RETRY_AFTER_SECS,
};
pub use ratelimit::{Admission, BucketKey, Clock, LimiterGuard, RateLimiter};
pub use retry::{parse_retry_after, RetryPolicy};
