//! Counters describing limiter behaviour.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Admission statistics, updated atomically and cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    admitted: AtomicU64,
    denied: AtomicU64,
    evicted: AtomicU64,
    cleanups: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self) {
        self.inner.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        self.inner.evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_cleanup(&self) {
        self.inner.cleanups.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests recorded against a bucket.
    pub fn admitted(&self) -> u64 {
        self.inner.admitted.load(Ordering::Relaxed)
    }

    /// Requests refused by an admission check.
    pub fn denied(&self) -> u64 {
        self.inner.denied.load(Ordering::Relaxed)
    }

    /// Buckets dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.inner.evicted.load(Ordering::Relaxed)
    }

    /// Completed cleanup passes.
    pub fn cleanups(&self) -> u64 {
        self.inner.cleanups.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted(),
            denied: self.denied(),
            evicted: self.evicted(),
            cleanups: self.cleanups(),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Requests counted against a quota
    pub admitted: u64,
    /// Requests refused by an atomic admission
    pub denied: u64,
    /// Buckets dropped to stay within capacity
    pub evicted: u64,
    /// Cleanup passes run, forced or opportunistic
    pub cleanups: u64,
}

impl MetricsSnapshot {
    /// Fraction of atomic admissions that were refused, 0.0 when none were made.
    pub fn denial_rate(&self) -> f64 {
        let total = self.admitted.saturating_add(self.denied);
        if total == 0 {
            0.0
        } else {
            self.denied as f64 / total as f64
        }
    }
}
