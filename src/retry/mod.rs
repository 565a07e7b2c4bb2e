//! Retry timing for throttled requests.
//!
//! The limiter never sleeps; waiting and retrying belongs to the calling
//! layer. This module provides that layer's building blocks.

mod policy;
mod retry_after;

pub use policy::RetryPolicy;
pub use retry_after::parse_retry_after;
