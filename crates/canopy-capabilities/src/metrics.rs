//! Observability counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lock-free counters for the engine's hot paths.
///
/// A cloneable handle; clones share the same counters. The decision
/// point, delegation service and stores bump these - nothing in the
/// engine ever reads them to make a decision.
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    decisions_allowed: AtomicU64,
    decisions_denied: AtomicU64,
    key_mismatches: AtomicU64,
    narrow_calls: AtomicU64,
    singleflight_followers: AtomicU64,
    store_hits: AtomicU64,
    store_misses: AtomicU64,
    pattern_cache_hits: AtomicU64,
    pattern_cache_misses: AtomicU64,
    revocations: AtomicU64,
}

/// A point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub decisions_allowed: u64,
    pub decisions_denied: u64,
    pub key_mismatches: u64,
    pub narrow_calls: u64,
    pub singleflight_followers: u64,
    pub store_hits: u64,
    pub store_misses: u64,
    pub pattern_cache_hits: u64,
    pub pattern_cache_misses: u64,
    pub revocations: u64,
}

impl EngineMetrics {
    /// Fresh counters, all zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_allow(&self) {
        self.inner.decisions_allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deny(&self) {
        self.inner.decisions_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_key_mismatch(&self) {
        self.inner.key_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_narrow(&self) {
        self.inner.narrow_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_singleflight_follower(&self) {
        self.inner
            .singleflight_followers
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_hit(&self) {
        self.inner.store_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_miss(&self) {
        self.inner.store_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pattern_cache(&self, hit: bool) {
        if hit {
            self.inner.pattern_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner
                .pattern_cache_misses
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_revocation(&self) {
        self.inner.revocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of `narrow` invocations observed so far.
    ///
    /// The single-flight tests key off this counter.
    #[must_use]
    pub fn narrow_calls(&self) -> u64 {
        self.inner.narrow_calls.load(Ordering::Relaxed)
    }

    /// Copy every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.inner;
        MetricsSnapshot {
            decisions_allowed: c.decisions_allowed.load(Ordering::Relaxed),
            decisions_denied: c.decisions_denied.load(Ordering::Relaxed),
            key_mismatches: c.key_mismatches.load(Ordering::Relaxed),
            narrow_calls: c.narrow_calls.load(Ordering::Relaxed),
            singleflight_followers: c.singleflight_followers.load(Ordering::Relaxed),
            store_hits: c.store_hits.load(Ordering::Relaxed),
            store_misses: c.store_misses.load(Ordering::Relaxed),
            pattern_cache_hits: c.pattern_cache_hits.load(Ordering::Relaxed),
            pattern_cache_misses: c.pattern_cache_misses.load(Ordering::Relaxed),
            revocations: c.revocations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = EngineMetrics::new();
        let clone = metrics.clone();
        clone.record_narrow();
        clone.record_allow();
        assert_eq!(metrics.narrow_calls(), 1);
        assert_eq!(metrics.snapshot().decisions_allowed, 1);
    }

    #[test]
    fn test_snapshot_copies_everything() {
        let metrics = EngineMetrics::new();
        metrics.record_deny();
        metrics.record_key_mismatch();
        metrics.record_singleflight_follower();
        metrics.record_store_hit();
        metrics.record_store_miss();
        metrics.record_pattern_cache(true);
        metrics.record_pattern_cache(false);
        metrics.record_revocation();

        let snap = metrics.snapshot();
        assert_eq!(snap.decisions_denied, 1);
        assert_eq!(snap.key_mismatches, 1);
        assert_eq!(snap.singleflight_followers, 1);
        assert_eq!(snap.store_hits, 1);
        assert_eq!(snap.store_misses, 1);
        assert_eq!(snap.pattern_cache_hits, 1);
        assert_eq!(snap.pattern_cache_misses, 1);
        assert_eq!(snap.revocations, 1);
    }
}
