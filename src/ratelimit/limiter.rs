//! Core rate limiter implementation.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::bucket::BucketState;
use super::clock::{Clock, SystemClock};
use super::counter::TimeWindow;
use super::key::BucketKey;
use super::metrics::Metrics;
use super::table::BucketTable;
use crate::config::RateLimitConfig;
use crate::error::RateLimitError;

/// Outcome of an atomic admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was counted and may be sent.
    Admitted,
    /// The request was refused and not counted.
    Denied {
        /// Time until the exhausted window rolls over
        retry_after: Duration,
        /// The window that refused the request
        window: TimeWindow,
    },
}

impl Admission {
    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }

    /// Wait before retrying; zero when admitted.
    pub fn retry_after(&self) -> Duration {
        match self {
            Admission::Admitted => Duration::ZERO,
            Admission::Denied { retry_after, .. } => *retry_after,
        }
    }
}

/// Remaining quota for a tracked bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    /// Requests admitted in the current minute window
    pub minute_count: u64,
    /// Requests admitted in the current day window
    pub daily_count: u64,
    /// Requests still allowed in the current minute window
    pub minute_remaining: u64,
    /// Requests still allowed in the current day window
    pub daily_remaining: u64,
}

/// Result of a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupStats {
    /// Buckets dropped because all their windows had expired
    pub expired: usize,
    /// Buckets still tracked after the pass
    pub remaining: usize,
}

/// Client-side quota enforcement for a single SDK session.
///
/// Tracks a minute and a day window per [`BucketKey`] and decides whether a
/// request may be sent. Share it between tasks with an `Arc`; all window
/// state sits behind one mutex, and no method blocks beyond that lock.
///
/// Two usage styles are supported:
///
/// * atomic: [`try_acquire`](Self::try_acquire) or
///   [`check_and_record`](Self::check_and_record) check and count in one step;
/// * two-step: [`lock`](Self::lock) returns a [`LimiterGuard`] under which the
///   caller checks, performs its own preparation, and records only if the
///   request is actually sent.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<LimiterState>,
    metrics: Metrics,
}

struct LimiterState {
    buckets: BucketTable,
    last_cleanup: Instant,
}

impl RateLimiter {
    /// Create a limiter driven by the system clock.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a limiter driven by a custom clock.
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        debug!(
            minute_limit = config.minute_limit(),
            daily_limit = config.daily_limit(),
            max_buckets = config.max_array_size(),
            "Creating rate limiter"
        );
        Self {
            state: Mutex::new(LimiterState {
                buckets: BucketTable::new(config.max_array_size()),
                last_cleanup: now,
            }),
            config,
            clock,
            metrics: Metrics::new(),
        }
    }

    /// The configuration this limiter enforces.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admission statistics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Current time according to the limiter's clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Lock the limiter for a check-then-record sequence at the current time.
    pub fn lock(&self) -> LimiterGuard<'_> {
        self.lock_at(self.now())
    }

    /// Lock the limiter for a check-then-record sequence at `now`.
    pub fn lock_at(&self, now: Instant) -> LimiterGuard<'_> {
        LimiterGuard {
            limiter: self,
            state: self.state.lock(),
            now,
        }
    }

    /// Whether a request for `key` may proceed now. Does not count it.
    pub fn can_proceed(&self, key: &BucketKey) -> bool {
        self.lock().can_proceed(key)
    }

    /// Whether a request for `key` may proceed at `now`. Does not count it.
    pub fn can_proceed_at(&self, key: &BucketKey, now: Instant) -> bool {
        self.lock_at(now).can_proceed(key)
    }

    /// Count a request that was admitted by an earlier check.
    ///
    /// Each call takes the lock separately, so under concurrency prefer
    /// [`lock`](Self::lock) or [`try_acquire`](Self::try_acquire).
    pub fn record_request(&self, key: &BucketKey) {
        self.lock().record_request(key)
    }

    /// Count a request at `now` that was admitted by an earlier check.
    pub fn record_request_at(&self, key: &BucketKey, now: Instant) {
        self.lock_at(now).record_request(key)
    }

    /// Time until `key` could admit another request.
    pub fn time_until_next_slot(&self, key: &BucketKey) -> Duration {
        self.lock().time_until_next_slot(key)
    }

    /// Time at `now` until `key` could admit another request.
    pub fn time_until_next_slot_at(&self, key: &BucketKey, now: Instant) -> Duration {
        self.lock_at(now).time_until_next_slot(key)
    }

    /// Check and count a request in one step.
    pub fn try_acquire(&self, key: &BucketKey) -> Admission {
        self.lock().try_acquire(key)
    }

    /// Check and count a request at `now` in one step.
    pub fn try_acquire_at(&self, key: &BucketKey, now: Instant) -> Admission {
        self.lock_at(now).try_acquire(key)
    }

    /// Check and count a request, returning a [`RateLimitError`] on denial.
    pub fn check_and_record(&self, key: &BucketKey) -> Result<(), RateLimitError> {
        self.check_and_record_at(key, self.now())
    }

    /// Check and count a request at `now`, returning a [`RateLimitError`] on denial.
    pub fn check_and_record_at(&self, key: &BucketKey, now: Instant) -> Result<(), RateLimitError> {
        match self.try_acquire_at(key, now) {
            Admission::Admitted => Ok(()),
            Admission::Denied { retry_after, window } => Err(denial_error(key, window, retry_after)),
        }
    }

    /// Error carrying the configured retry delay, for when no window state applies.
    pub fn fallback_error(&self) -> RateLimitError {
        RateLimitError::from_wait("Rate limit exceeded", self.config.retry_delay())
    }

    /// Age out stale buckets now, regardless of the interval.
    pub fn cleanup(&self) -> CleanupStats {
        self.cleanup_at(self.now())
    }

    /// Age out stale buckets at `now`, regardless of the interval.
    pub fn cleanup_at(&self, now: Instant) -> CleanupStats {
        self.lock_at(now).cleanup()
    }

    /// Current usage for `key`, if it is tracked. Does not refresh recency.
    pub fn usage(&self, key: &BucketKey) -> Option<Usage> {
        let state = self.state.lock();
        state.buckets.peek(key).map(|bucket| Usage {
            minute_count: bucket.minute().count(),
            daily_count: bucket.day().count(),
            minute_remaining: bucket.minute().remaining(),
            daily_remaining: bucket.day().remaining(),
        })
    }

    /// Get the number of tracked buckets.
    pub fn bucket_count(&self) -> usize {
        self.state.lock().buckets.len()
    }

    /// Whether `key` currently has a tracked bucket.
    pub fn is_tracked(&self, key: &BucketKey) -> bool {
        self.state.lock().buckets.contains(key)
    }

    /// Clear all buckets.
    pub fn clear(&self) {
        self.state.lock().buckets.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

fn denial_error(key: &BucketKey, window: TimeWindow, retry_after: Duration) -> RateLimitError {
    RateLimitError::from_wait(
        format!("{} rate limit exceeded for {}", window.name(), key),
        retry_after,
    )
    .with_bucket(key.clone())
}

/// Exclusive access to the limiter state at a fixed instant.
///
/// Holding the guard makes a `can_proceed` followed by `record_request` one
/// critical section, so concurrent callers cannot both pass the check for
/// the last slot.
pub struct LimiterGuard<'a> {
    limiter: &'a RateLimiter,
    state: MutexGuard<'a, LimiterState>,
    now: Instant,
}

impl LimiterGuard<'_> {
    /// The instant this guard evaluates windows at.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Whether a request for `key` may proceed. Does not count it.
    ///
    /// An untracked bucket always may, since every limit is at least one; the
    /// check does not start tracking it.
    pub fn can_proceed(&mut self, key: &BucketKey) -> bool {
        self.maybe_cleanup();
        let now = self.now;
        let allowed = match self.state.buckets.get_mut(key) {
            Some(bucket) => bucket.can_proceed(now),
            None => true,
        };

        trace!(bucket = %key, allowed = allowed, "Checking rate limit");
        allowed
    }

    /// Count a request for `key`. Does not re-check the limits.
    pub fn record_request(&mut self, key: &BucketKey) {
        let now = self.now;
        let config = &self.limiter.config;
        let ((), evicted) = self.state.buckets.with_bucket(
            key,
            || BucketState::new(config, now),
            |bucket| bucket.record_request(now),
        );
        self.note_eviction(evicted);
        self.limiter.metrics.record_admitted();
    }

    /// Time until `key` could admit another request; zero for untracked buckets.
    pub fn time_until_next_slot(&mut self, key: &BucketKey) -> Duration {
        let now = self.now;
        self.state
            .buckets
            .get_mut(key)
            .map_or(Duration::ZERO, |bucket| bucket.time_until_next_slot(now))
    }

    /// Check and count a request in one step.
    ///
    /// Only refusals made here count towards the denied metric.
    pub fn try_acquire(&mut self, key: &BucketKey) -> Admission {
        self.maybe_cleanup();
        let now = self.now;
        let config = &self.limiter.config;
        let (denied, evicted) = self.state.buckets.with_bucket(
            key,
            || BucketState::new(config, now),
            |bucket| {
                if bucket.can_proceed(now) {
                    bucket.record_request(now);
                    None
                } else {
                    Some((bucket.time_until_next_slot(now), bucket.exhausted_window()))
                }
            },
        );
        self.note_eviction(evicted);

        let (retry_after, window) = match denied {
            None => {
                trace!(bucket = %key, "Request admitted");
                self.limiter.metrics.record_admitted();
                return Admission::Admitted;
            }
            Some((wait, window)) => (wait, window.unwrap_or(TimeWindow::Minute)),
        };
        self.limiter.metrics.record_denied();
        debug!(
            bucket = %key,
            window = window.name(),
            retry_after_secs = retry_after.as_secs(),
            "Rate limit exceeded"
        );
        Admission::Denied { retry_after, window }
    }

    /// Age out buckets whose windows have all expired.
    ///
    /// Capacity needs no pass of its own: the table evicts its least recently
    /// used bucket whenever a new one would exceed it.
    pub fn cleanup(&mut self) -> CleanupStats {
        let now = self.now;
        let expired = self.state.buckets.remove_stale(now);
        let remaining = self.state.buckets.len();
        self.state.last_cleanup = now;

        self.limiter.metrics.record_cleanup();
        debug!(expired = expired, remaining = remaining, "Rate limiter cleanup");
        CleanupStats { expired, remaining }
    }

    fn maybe_cleanup(&mut self) {
        let since = self.now.saturating_duration_since(self.state.last_cleanup);
        if since >= self.limiter.config.cleanup_interval() {
            self.cleanup();
        }
    }

    fn note_eviction(&self, evicted: Option<BucketKey>) {
        if let Some(key) = evicted {
            debug!(bucket = %key, "Evicted least recently used bucket");
            self.limiter.metrics.record_evictions(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::MockClock;

    fn limiter(minute: i64, daily: i64) -> (RateLimiter, MockClock) {
        let config = RateLimitConfig::builder()
            .minute_limit(minute)
            .daily_limit(daily)
            .build()
            .unwrap();
        let clock = MockClock::new(Instant::now());
        (RateLimiter::with_clock(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_rate_limiter_creation() {
        let (limiter, _) = limiter(10, 100);
        assert_eq!(limiter.bucket_count(), 0);
        assert_eq!(limiter.config().minute_limit(), 10);
    }

    #[test]
    fn test_check_then_record_scenario() {
        let (limiter, clock) = limiter(2, 1000);
        let key = BucketKey::Global;

        assert!(limiter.can_proceed(&key));
        limiter.record_request(&key);
        assert!(limiter.can_proceed(&key));
        limiter.record_request(&key);
        assert!(!limiter.can_proceed(&key));
        assert_eq!(limiter.time_until_next_slot(&key), Duration::from_secs(60));

        clock.advance(Duration::from_secs(61));
        assert!(limiter.can_proceed(&key));
        assert_eq!(limiter.time_until_next_slot(&key), Duration::ZERO);
    }

    #[test]
    fn test_try_acquire_denies_without_counting() {
        let (limiter, clock) = limiter(1, 10);
        let key = BucketKey::endpoint("/orders");

        assert!(limiter.try_acquire(&key).is_admitted());
        clock.advance(Duration::from_secs(20));

        let denied = limiter.try_acquire(&key);
        assert_eq!(
            denied,
            Admission::Denied {
                retry_after: Duration::from_secs(40),
                window: TimeWindow::Minute,
            }
        );
        assert_eq!(limiter.usage(&key).unwrap().minute_count, 1);
        assert_eq!(limiter.metrics().admitted(), 1);
        assert_eq!(limiter.metrics().denied(), 1);
    }

    #[test]
    fn test_check_and_record_error() {
        let (limiter, _) = limiter(1, 10);
        let key = BucketKey::endpoint("/orders");

        assert!(limiter.check_and_record(&key).is_ok());
        let err = limiter.check_and_record(&key).unwrap_err();

        assert_eq!(err.retry_after_secs(), 60);
        assert_eq!(err.bucket(), Some(&key));
        assert_eq!(err.message(), "minute rate limit exceeded for endpoint:/orders");
        assert!(!err.is_server_reported());
    }

    #[test]
    fn test_separate_buckets() {
        let (limiter, _) = limiter(1, 10);
        let a = BucketKey::endpoint("a");
        let b = BucketKey::credential("b");

        assert!(limiter.try_acquire(&a).is_admitted());
        assert!(limiter.try_acquire(&b).is_admitted());
        assert!(!limiter.try_acquire(&a).is_admitted());
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn test_guard_two_step() {
        let (limiter, _) = limiter(1, 10);
        let key = BucketKey::Global;

        {
            let mut guard = limiter.lock();
            assert!(guard.can_proceed(&key));
            // Send failed before reaching the network: nothing recorded.
        }
        {
            let mut guard = limiter.lock();
            assert!(guard.can_proceed(&key));
            guard.record_request(&key);
            assert!(!guard.can_proceed(&key));
        }
        assert_eq!(limiter.usage(&key).unwrap().minute_remaining, 0);
    }

    #[test]
    fn test_untracked_bucket_has_no_wait() {
        let (limiter, _) = limiter(1, 10);
        assert_eq!(
            limiter.time_until_next_slot(&BucketKey::endpoint("never")),
            Duration::ZERO
        );
        assert!(!limiter.is_tracked(&BucketKey::endpoint("never")));
        assert!(limiter.usage(&BucketKey::endpoint("never")).is_none());
    }

    #[test]
    fn test_opportunistic_cleanup_runs_after_interval() {
        let config = RateLimitConfig::builder()
            .minute_limit(5)
            .daily_limit(5)
            .cleanup_interval(60)
            .build()
            .unwrap();
        let clock = MockClock::new(Instant::now());
        let limiter = RateLimiter::with_clock(config, Arc::new(clock.clone()));

        limiter.try_acquire(&BucketKey::endpoint("old"));
        clock.advance(Duration::from_secs(86400));
        limiter.try_acquire(&BucketKey::endpoint("new"));

        assert!(!limiter.is_tracked(&BucketKey::endpoint("old")));
        assert!(limiter.is_tracked(&BucketKey::endpoint("new")));
        assert_eq!(limiter.metrics().cleanups(), 1);
    }

    #[test]
    fn test_cleanup_waits_for_interval() {
        let config = RateLimitConfig::builder()
            .cleanup_interval(60)
            .build()
            .unwrap();
        let clock = MockClock::new(Instant::now());
        let limiter = RateLimiter::with_clock(config, Arc::new(clock.clone()));
        let key = BucketKey::Global;

        clock.advance(Duration::from_secs(30));
        limiter.try_acquire(&key);
        assert!(limiter.can_proceed(&key));
        assert_eq!(limiter.metrics().cleanups(), 0);

        clock.advance(Duration::from_secs(30));
        limiter.try_acquire(&key);
        assert_eq!(limiter.metrics().cleanups(), 1);

        clock.advance(Duration::from_secs(30));
        assert!(limiter.can_proceed(&key));
        clock.advance(Duration::from_secs(29));
        limiter.try_acquire(&key);
        assert_eq!(limiter.metrics().cleanups(), 1);

        clock.advance(Duration::from_secs(1));
        assert!(limiter.can_proceed(&key));
        assert_eq!(limiter.metrics().cleanups(), 2);
    }

    #[test]
    fn test_check_does_not_track_or_evict() {
        let config = RateLimitConfig::builder()
            .minute_limit(1)
            .daily_limit(1)
            .max_array_size(1)
            .build()
            .unwrap();
        let clock = MockClock::new(Instant::now());
        let limiter = RateLimiter::with_clock(config, Arc::new(clock));
        let a = BucketKey::endpoint("a");
        let b = BucketKey::endpoint("b");

        assert!(limiter.try_acquire(&a).is_admitted());
        assert!(!limiter.can_proceed(&a));
        assert!(limiter.can_proceed(&b));

        assert!(!limiter.is_tracked(&b));
        assert!(limiter.is_tracked(&a));
        assert!(!limiter.try_acquire(&a).is_admitted());
        assert_eq!(limiter.metrics().evicted(), 0);
    }

    #[test]
    fn test_repeated_checks_do_not_count_denials() {
        let (limiter, _) = limiter(1, 10);
        let key = BucketKey::Global;
        assert!(limiter.try_acquire(&key).is_admitted());

        {
            let mut guard = limiter.lock();
            for _ in 0..5 {
                assert!(!guard.can_proceed(&key));
            }
        }
        assert_eq!(limiter.metrics().denied(), 0);

        assert!(!limiter.try_acquire(&key).is_admitted());
        assert_eq!(limiter.metrics().denied(), 1);
        assert_eq!(limiter.metrics().snapshot().denial_rate(), 0.5);
    }

    #[test]
    fn test_unkeyed_requests_share_global_bucket() {
        let (limiter, _) = limiter(2, 10);

        assert!(limiter.check_and_record(&BucketKey::default()).is_ok());
        assert!(limiter.check_and_record(&BucketKey::Global).is_ok());
        let err = limiter.check_and_record(&BucketKey::default()).unwrap_err();

        assert_eq!(err.bucket(), Some(&BucketKey::Global));
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_capacity_evicts_lru() {
        let config = RateLimitConfig::builder().max_array_size(2).build().unwrap();
        let clock = MockClock::new(Instant::now());
        let limiter = RateLimiter::with_clock(config, Arc::new(clock));

        limiter.try_acquire(&BucketKey::endpoint("a"));
        limiter.try_acquire(&BucketKey::endpoint("b"));
        limiter.try_acquire(&BucketKey::endpoint("a"));
        limiter.try_acquire(&BucketKey::endpoint("c"));

        assert_eq!(limiter.bucket_count(), 2);
        assert!(limiter.is_tracked(&BucketKey::endpoint("a")));
        assert!(!limiter.is_tracked(&BucketKey::endpoint("b")));
        assert_eq!(limiter.metrics().evicted(), 1);
    }

    #[test]
    fn test_fallback_error_uses_retry_delay() {
        let config = RateLimitConfig::builder().retry_delay(15).build().unwrap();
        let limiter = RateLimiter::new(config);
        assert_eq!(limiter.fallback_error().retry_after_secs(), 15);
    }

    #[test]
    fn test_clear() {
        let (limiter, _) = limiter(1, 10);
        limiter.try_acquire(&BucketKey::Global);
        assert_eq!(limiter.bucket_count(), 1);

        limiter.clear();
        assert_eq!(limiter.bucket_count(), 0);
    }
}
