//! Parsing of server-reported `Retry-After` values.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::MAX_RETRY_AFTER_SECS;

/// Parse a `Retry-After` header value into a wait relative to `now`.
///
/// Accepts delta-seconds (`"120"`) or an HTTP-date
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). Dates in the past yield a zero wait;
/// waits longer than [`MAX_RETRY_AFTER_SECS`] are clamped to it.
/// Returns `None` for anything else.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let ceiling = Duration::from_secs(MAX_RETRY_AFTER_SECS);
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs).min(ceiling));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = date.with_timezone(&Utc) - now;
    Some(wait.to_std().unwrap_or(Duration::ZERO).min(ceiling))
}
