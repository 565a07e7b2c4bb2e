//! Fixed window counter implementation.

use std::time::{Duration, Instant};

/// Time window for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeWindow {
    /// Per-minute rate limiting
    Minute,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }

    /// Short name used in log fields and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            TimeWindow::Minute => "minute",
            TimeWindow::Day => "daily",
        }
    }
}

/// Counts admitted requests within one fixed window.
///
/// The window starts at the first observation and restarts at the first
/// observation made at or after `window_start + window.duration()`. Not
/// synchronized: callers hold the limiter lock.
#[derive(Debug, Clone)]
pub struct WindowCounter {
    /// Requests admitted in the current window
    count: u64,
    /// The limit for this counter
    limit: u64,
    /// Time window for this counter
    window: TimeWindow,
    /// When the current window started
    window_start: Instant,
}

impl WindowCounter {
    /// Create a counter whose first window starts at `now`.
    pub fn new(limit: u64, window: TimeWindow, now: Instant) -> Self {
        Self {
            count: 0,
            limit,
            window,
            window_start: now,
        }
    }

    /// Restart the window if `now` has reached its end.
    ///
    /// Returns `true` when a rollover happened.
    pub fn roll(&mut self, now: Instant) -> bool {
        if self.is_expired(now) {
            self.count = 0;
            self.window_start = now;
            true
        } else {
            false
        }
    }

    /// Whether `now` is at or past the end of the current window.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window.duration()
    }

    /// Whether another request fits within the limit.
    pub fn has_capacity(&self) -> bool {
        self.count < self.limit
    }

    /// Count one admitted request. Does not check the limit.
    pub fn record(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// Get the current count.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Get the remaining quota.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }

    /// Get the limit for this counter.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Get the time window for this counter.
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// When the current window started.
    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    /// Get the duration until the current window resets.
    pub fn duration_until_reset(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.window_start);
        self.window.duration().saturating_sub(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_window_duration() {
        assert_eq!(TimeWindow::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeWindow::Day.duration(), Duration::from_secs(86400));
    }

    #[test]
    fn test_counter_record_within_limit() {
        let now = Instant::now();
        let mut counter = WindowCounter::new(10, TimeWindow::Minute, now);

        assert!(counter.has_capacity());
        counter.record();
        assert_eq!(counter.count(), 1);
        assert_eq!(counter.remaining(), 9);
    }

    #[test]
    fn test_counter_exhausted() {
        let now = Instant::now();
        let mut counter = WindowCounter::new(3, TimeWindow::Minute, now);

        for _ in 0..3 {
            assert!(counter.has_capacity());
            counter.record();
        }
        assert!(!counter.has_capacity());
        assert_eq!(counter.remaining(), 0);
    }

    #[test]
    fn test_roll_at_boundary() {
        let start = Instant::now();
        let mut counter = WindowCounter::new(1, TimeWindow::Minute, start);
        counter.record();

        assert!(!counter.roll(start + Duration::from_secs(59)));
        assert_eq!(counter.count(), 1);

        let boundary = start + Duration::from_secs(60);
        assert!(counter.roll(boundary));
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.window_start(), boundary);
    }

    #[test]
    fn test_duration_until_reset() {
        let start = Instant::now();
        let counter = WindowCounter::new(1, TimeWindow::Minute, start);

        assert_eq!(counter.duration_until_reset(start), Duration::from_secs(60));
        assert_eq!(
            counter.duration_until_reset(start + Duration::from_secs(45)),
            Duration::from_secs(15)
        );
        assert_eq!(
            counter.duration_until_reset(start + Duration::from_secs(90)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_clock_before_window_start() {
        let start = Instant::now() + Duration::from_secs(10);
        let counter = WindowCounter::new(1, TimeWindow::Minute, start);

        assert!(!counter.is_expired(Instant::now()));
        assert_eq!(counter.duration_until_reset(Instant::now()), Duration::from_secs(60));
    }
}
