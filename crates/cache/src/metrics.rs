//! Cache metrics collection.
//!
//! Counters use `Ordering::Relaxed` throughout: each counter is independent
//! and monotonically increasing, and snapshots are telemetry — approximate
//! cross-counter consistency is acceptable and keeps the hot path free of
//! memory barriers.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Collects hit/miss/stale/refresh counters for one cache instance.
#[derive(Clone, Default)]
pub struct CacheMetrics {
    inner: Arc<CacheMetricsInner>,
}

#[derive(Default)]
struct CacheMetricsInner {
    hits: AtomicU64,
    negative_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    evictions: AtomicU64,
    followed_loads: AtomicU64,
}

/// Point-in-time snapshot of cache metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bon::Builder)]
pub struct CacheMetricsSnapshot {
    /// Fresh positive hits.
    #[builder(default)]
    pub hits: u64,
    /// Fresh negative ("known absent") hits.
    #[builder(default)]
    pub negative_hits: u64,
    /// Entries served stale while a refresh was scheduled.
    #[builder(default)]
    pub stale_hits: u64,
    /// Calls that had to load.
    #[builder(default)]
    pub misses: u64,
    /// Background refreshes completed.
    #[builder(default)]
    pub refreshes: u64,
    /// Background refreshes that failed (stale entry retained).
    #[builder(default)]
    pub refresh_failures: u64,
    /// Entries evicted by expiry or capacity pressure.
    #[builder(default)]
    pub evictions: u64,
    /// Calls that joined another caller's in-flight load.
    #[builder(default)]
    pub followed_loads: u64,
}

impl CacheMetricsSnapshot {
    /// Returns the hit rate over all lookups (0.0 - 1.0), counting stale
    /// and negative hits as hits.
    #[must_use = "returns a computed rate without side effects"]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits + self.negative_hits + self.stale_hits;
        let total = hits + self.misses;
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }
}

impl CacheMetrics {
    /// Creates a new metrics collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self, negative: bool) {
        if negative {
            self.inner.negative_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_stale_hit(&self) {
        self.inner.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh(&self, failed: bool) {
        if failed {
            self.inner.refresh_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.refreshes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_eviction(&self) {
        self.inner.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_followed_load(&self) {
        self.inner.followed_loads.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of current counters.
    #[must_use = "returns a point-in-time snapshot without side effects"]
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.inner.hits.load(Ordering::Relaxed),
            negative_hits: self.inner.negative_hits.load(Ordering::Relaxed),
            stale_hits: self.inner.stale_hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            refreshes: self.inner.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.inner.refresh_failures.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            followed_loads: self.inner.followed_loads.load(Ordering::Relaxed),
        }
    }
}
