//! Fixed-capacity bucket storage with least-recently-used eviction.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::Instant;

use super::bucket::BucketState;
use super::key::BucketKey;

/// Tracked buckets, bounded to `capacity` entries.
///
/// Reads through [`get_mut`](Self::get_mut) or [`with_bucket`](Self::with_bucket)
/// mark a bucket as recently used; [`peek`](Self::peek) does not.
#[derive(Debug)]
pub struct BucketTable {
    buckets: LruCache<BucketKey, BucketState>,
}

impl BucketTable {
    /// Create an empty table holding at most `capacity` buckets (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            buckets: LruCache::new(capacity),
        }
    }

    /// Access a bucket, creating it with `factory` if it is not tracked.
    ///
    /// Creating a bucket at capacity evicts the least recently used one; the
    /// evicted key is returned alongside the accessor's result.
    pub fn with_bucket<F, R>(
        &mut self,
        key: &BucketKey,
        factory: impl FnOnce() -> BucketState,
        accessor: F,
    ) -> (R, Option<BucketKey>)
    where
        F: FnOnce(&mut BucketState) -> R,
    {
        if let Some(state) = self.buckets.get_mut(key) {
            return (accessor(state), None);
        }

        let mut state = factory();
        let result = accessor(&mut state);
        let evicted = self.buckets.push(key.clone(), state).map(|(old, _)| old);
        (result, evicted)
    }

    /// A tracked bucket, marked as recently used. Never creates one.
    pub fn get_mut(&mut self, key: &BucketKey) -> Option<&mut BucketState> {
        self.buckets.get_mut(key)
    }

    /// Inspect a bucket without refreshing its recency.
    pub fn peek(&self, key: &BucketKey) -> Option<&BucketState> {
        self.buckets.peek(key)
    }

    /// Remove buckets whose windows have all expired. Returns how many were removed.
    pub fn remove_stale(&mut self, now: Instant) -> usize {
        let stale: Vec<BucketKey> = self
            .buckets
            .iter()
            .filter(|(_, state)| state.is_stale(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.buckets.pop(key);
        }
        stale.len()
    }

    /// The least recently used key, if any.
    pub fn lru_key(&self) -> Option<&BucketKey> {
        self.buckets.peek_lru().map(|(key, _)| key)
    }

    /// Whether a bucket is tracked.
    pub fn contains(&self, key: &BucketKey) -> bool {
        self.buckets.contains(key)
    }

    /// Number of tracked buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no buckets are tracked.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Maximum number of buckets kept.
    pub fn capacity(&self) -> usize {
        self.buckets.cap().get()
    }

    /// Drop every bucket.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
