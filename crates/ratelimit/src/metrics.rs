//! Rate-limit metrics collection.
//!
//! Decision counters are lock-free `AtomicU64`s with `Relaxed` ordering
//! (independent, monotonically increasing; snapshots are telemetry). The
//! forward-latency histogram is a bounded circular buffer of recent
//! samples; percentiles are computed by sorting a copy at snapshot time,
//! keeping the record path O(1) under a briefly-held mutex.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;

/// Number of latency samples retained for percentile computation.
const HISTOGRAM_WINDOW_SIZE: usize = 1024;

/// Latency percentiles in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyPercentiles {
    /// 50th percentile (median).
    pub p50: u64,
    /// 95th percentile.
    pub p95: u64,
    /// 99th percentile.
    pub p99: u64,
}

/// Bounded circular buffer of latency samples.
struct LatencyHistogram {
    inner: Mutex<HistogramInner>,
}

struct HistogramInner {
    buf: Vec<u64>,
    pos: usize,
    capacity: usize,
}

impl LatencyHistogram {
    fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(HistogramInner { buf: Vec::with_capacity(capacity), pos: 0, capacity }) }
    }

    fn record(&self, value_us: u64) {
        let mut inner = self.inner.lock();
        let pos = inner.pos;
        if inner.buf.len() < inner.capacity {
            inner.buf.push(value_us);
        } else {
            inner.buf[pos] = value_us;
        }
        inner.pos = (pos + 1) % inner.capacity;
    }

    fn percentiles(&self) -> LatencyPercentiles {
        let inner = self.inner.lock();
        if inner.buf.is_empty() {
            return LatencyPercentiles::default();
        }
        let mut sorted = inner.buf.clone();
        sorted.sort_unstable();
        let len = sorted.len();
        LatencyPercentiles {
            p50: sorted[percentile_index(len, 50)],
            p95: sorted[percentile_index(len, 95)],
            p99: sorted[percentile_index(len, 99)],
        }
    }
}

/// Nearest-rank index for a percentile in a sorted array of `len` values.
fn percentile_index(len: usize, percentile: u32) -> usize {
    if len == 0 {
        return 0;
    }
    let rank = (u64::from(percentile) * len as u64).div_ceil(100) as usize;
    rank.saturating_sub(1).min(len - 1)
}

/// Collects rate-limit decision and replication counters.
#[derive(Clone)]
pub struct RatelimitMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    allowed: AtomicU64,
    denied: AtomicU64,
    failed_open: AtomicU64,
    forwarded: AtomicU64,
    peer_unavailable: AtomicU64,
    ring_empty: AtomicU64,
    gossip_increments_sent: AtomicU64,
    gossip_frames_sent: AtomicU64,
    gossip_frames_failed: AtomicU64,
    snapshots_shed: AtomicU64,
    forward_latency: LatencyHistogram,
}

/// Point-in-time snapshot of rate-limit metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bon::Builder)]
pub struct RatelimitMetricsSnapshot {
    /// Takes admitted (local or forwarded).
    #[builder(default)]
    pub allowed: u64,
    /// Takes denied.
    #[builder(default)]
    pub denied: u64,
    /// Takes served locally because the owner was unreachable or the ring
    /// was empty.
    #[builder(default)]
    pub failed_open: u64,
    /// Takes forwarded to an owning peer.
    #[builder(default)]
    pub forwarded: u64,
    /// Forwarded takes that failed (timeout or transport error).
    #[builder(default)]
    pub peer_unavailable: u64,
    /// Routing attempts against an empty ring.
    #[builder(default)]
    pub ring_empty: u64,
    /// Increments shipped in gossip frames.
    #[builder(default)]
    pub gossip_increments_sent: u64,
    /// Gossip frames delivered.
    #[builder(default)]
    pub gossip_frames_sent: u64,
    /// Gossip frames that failed to deliver.
    #[builder(default)]
    pub gossip_frames_failed: u64,
    /// Snapshot payloads skipped under queue pressure.
    #[builder(default)]
    pub snapshots_shed: u64,
    /// Forward RPC latency percentiles (microseconds).
    #[builder(default)]
    pub forward_latency: LatencyPercentiles,
}

impl RatelimitMetrics {
    /// Creates a new metrics collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                allowed: AtomicU64::new(0),
                denied: AtomicU64::new(0),
                failed_open: AtomicU64::new(0),
                forwarded: AtomicU64::new(0),
                peer_unavailable: AtomicU64::new(0),
                ring_empty: AtomicU64::new(0),
                gossip_increments_sent: AtomicU64::new(0),
                gossip_frames_sent: AtomicU64::new(0),
                gossip_frames_failed: AtomicU64::new(0),
                snapshots_shed: AtomicU64::new(0),
                forward_latency: LatencyHistogram::new(HISTOGRAM_WINDOW_SIZE),
            }),
        }
    }

    pub(crate) fn record_decision(&self, success: bool) {
        if success {
            self.inner.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_failed_open(&self) {
        self.inner.failed_open.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forward(&self, latency: Duration) {
        self.inner.forwarded.fetch_add(1, Ordering::Relaxed);
        self.inner.forward_latency.record(latency.as_micros() as u64);
    }

    pub(crate) fn record_peer_unavailable(&self) {
        self.inner.peer_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ring_empty(&self) {
        self.inner.ring_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gossip_increments(&self, count: usize) {
        self.inner.gossip_increments_sent.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_gossip_frame(&self, delivered: bool) {
        if delivered {
            self.inner.gossip_frames_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.gossip_frames_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_snapshot_shed(&self) {
        self.inner.snapshots_shed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of current counters and percentiles.
    #[must_use = "returns a point-in-time snapshot without side effects"]
    pub fn snapshot(&self) -> RatelimitMetricsSnapshot {
        RatelimitMetricsSnapshot {
            allowed: self.inner.allowed.load(Ordering::Relaxed),
            denied: self.inner.denied.load(Ordering::Relaxed),
            failed_open: self.inner.failed_open.load(Ordering::Relaxed),
            forwarded: self.inner.forwarded.load(Ordering::Relaxed),
            peer_unavailable: self.inner.peer_unavailable.load(Ordering::Relaxed),
            ring_empty: self.inner.ring_empty.load(Ordering::Relaxed),
            gossip_increments_sent: self.inner.gossip_increments_sent.load(Ordering::Relaxed),
            gossip_frames_sent: self.inner.gossip_frames_sent.load(Ordering::Relaxed),
            gossip_frames_failed: self.inner.gossip_frames_failed.load(Ordering::Relaxed),
            snapshots_shed: self.inner.snapshots_shed.load(Ordering::Relaxed),
            forward_latency: self.inner.forward_latency.percentiles(),
        }
    }
}

impl Default for RatelimitMetrics {
    fn default() -> Self {
        Self::new()
    }
}
