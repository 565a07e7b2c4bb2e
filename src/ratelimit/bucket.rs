//! Per-bucket window state.

use std::time::{Duration, Instant};
use tracing::debug;

use super::counter::{TimeWindow, WindowCounter};
use crate::config::RateLimitConfig;

/// The pair of nested windows tracked for a single bucket.
#[derive(Debug, Clone)]
pub struct BucketState {
    minute: WindowCounter,
    day: WindowCounter,
}

impl BucketState {
    /// Create a bucket whose windows start at `now`.
    pub fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            minute: WindowCounter::new(config.minute_limit(), TimeWindow::Minute, now),
            day: WindowCounter::new(config.daily_limit(), TimeWindow::Day, now),
        }
    }

    /// Roll expired windows forward, then report whether a request may proceed.
    ///
    /// Never changes the admitted counts other than resetting them on rollover.
    pub fn can_proceed(&mut self, now: Instant) -> bool {
        self.roll(now);
        self.minute.has_capacity() && self.day.has_capacity()
    }

    /// Count one request against both windows.
    ///
    /// Assumes admission was checked; the limits are not re-validated.
    pub fn record_request(&mut self, now: Instant) {
        self.roll(now);
        self.minute.record();
        self.day.record();
    }

    /// How long until a request would be admitted. Zero if one would be now.
    ///
    /// When the day quota is exhausted its remainder dominates.
    pub fn time_until_next_slot(&mut self, now: Instant) -> Duration {
        self.roll(now);
        let mut wait = Duration::ZERO;
        for counter in [&self.minute, &self.day] {
            if !counter.has_capacity() {
                wait = wait.max(counter.duration_until_reset(now));
            }
        }
        wait
    }

    /// The window currently refusing requests, preferring the day window.
    pub fn exhausted_window(&self) -> Option<TimeWindow> {
        if !self.day.has_capacity() {
            Some(TimeWindow::Day)
        } else if !self.minute.has_capacity() {
            Some(TimeWindow::Minute)
        } else {
            None
        }
    }

    /// Whether both windows have run out, making this bucket equivalent to a fresh one.
    pub fn is_stale(&self, now: Instant) -> bool {
        self.minute.is_expired(now) && self.day.is_expired(now)
    }

    /// The minute window counter.
    pub fn minute(&self) -> &WindowCounter {
        &self.minute
    }

    /// The day window counter.
    pub fn day(&self) -> &WindowCounter {
        &self.day
    }

    fn roll(&mut self, now: Instant) {
        for counter in [&mut self.minute, &mut self.day] {
            if counter.roll(now) {
                debug!(window = counter.window().name(), "Rate limit window rolled over");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(minute: i64, daily: i64) -> RateLimitConfig {
        RateLimitConfig::builder()
            .minute_limit(minute)
            .daily_limit(daily)
            .build()
            .unwrap()
    }

    #[test]
    fn test_minute_exhaustion_and_rollover() {
        let t0 = Instant::now();
        let mut bucket = BucketState::new(&config(2, 1000), t0);

        assert!(bucket.can_proceed(t0));
        bucket.record_request(t0);
        assert!(bucket.can_proceed(t0));
        bucket.record_request(t0);
        assert!(!bucket.can_proceed(t0));
        assert_eq!(bucket.time_until_next_slot(t0), Duration::from_secs(60));
        assert_eq!(bucket.exhausted_window(), Some(TimeWindow::Minute));

        let t61 = t0 + Duration::from_secs(61);
        assert!(bucket.can_proceed(t61));
        assert_eq!(bucket.minute().count(), 0);
        assert_eq!(bucket.day().count(), 2);
        assert_eq!(bucket.time_until_next_slot(t61), Duration::ZERO);
    }

    #[test]
    fn test_can_proceed_does_not_count() {
        let t0 = Instant::now();
        let mut bucket = BucketState::new(&config(1, 10), t0);

        for _ in 0..5 {
            assert!(bucket.can_proceed(t0));
        }
        assert_eq!(bucket.minute().count(), 0);
    }

    #[test]
    fn test_day_exhaustion_dominates() {
        let t0 = Instant::now();
        let mut bucket = BucketState::new(&config(2, 3), t0);

        bucket.record_request(t0);
        bucket.record_request(t0);
        let t60 = t0 + Duration::from_secs(60);
        assert!(bucket.can_proceed(t60));
        bucket.record_request(t60);
        assert!(!bucket.can_proceed(t60));

        assert_eq!(bucket.exhausted_window(), Some(TimeWindow::Day));
        assert_eq!(
            bucket.time_until_next_slot(t60),
            Duration::from_secs(86400 - 60)
        );

        let t120 = t0 + Duration::from_secs(120);
        assert!(!bucket.can_proceed(t120), "minute rollover does not lift the daily quota");

        let next_day = t0 + Duration::from_secs(86400);
        assert!(bucket.can_proceed(next_day));
    }

    #[test]
    fn test_wait_is_non_increasing_towards_boundary() {
        let t0 = Instant::now();
        let mut bucket = BucketState::new(&config(1, 100), t0);
        bucket.record_request(t0);

        let mut previous = bucket.time_until_next_slot(t0);
        for secs in 1..=60 {
            let wait = bucket.time_until_next_slot(t0 + Duration::from_secs(secs));
            assert!(wait <= previous);
            previous = wait;
        }
        assert_eq!(previous, Duration::ZERO);
    }

    #[test]
    fn test_is_stale() {
        let t0 = Instant::now();
        let bucket = BucketState::new(&config(1, 10), t0);

        assert!(!bucket.is_stale(t0 + Duration::from_secs(120)));
        assert!(bucket.is_stale(t0 + Duration::from_secs(86400)));
    }
}
