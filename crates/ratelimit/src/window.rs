//! Sliding-window counters and the partitioned window store.
//!
//! Per fingerprint the store retains at most two windows — current and
//! previous. A request at time `t` blends them:
//!
//! ```text
//! current_seq  = t / duration
//! elapsed_frac = (t mod duration) / duration
//! estimated    = prev.counter * (1 - elapsed_frac) + current.counter
//! ```
//!
//! Windows move through `Active → Stale → Evicted` (see [`WindowState`]):
//! only Active windows accept increments, Stale windows feed the sliding
//! estimate, and windows older than `2 * duration` are garbage.
//!
//! The map is sharded by fingerprint into fixed partitions, each behind
//! its own lock, so hot tenants do not contend with each other.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::identifier::RatelimitIdentifier;

/// Lifecycle state of a window at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowState {
    /// `now < start + duration`: accepts increments.
    Active,
    /// `start + duration <= now < start + 2*duration`: read-only, feeds
    /// the sliding estimate as the "previous" window.
    Stale,
    /// `now >= start + 2*duration`: dead, reclaimed by GC.
    Evicted,
}

/// A fixed window of admitted cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    /// `floor(start_ms / duration_ms)`.
    pub sequence: i64,
    /// `sequence * duration_ms`.
    pub start_ms: i64,
    /// Window length.
    pub duration_ms: i64,
    /// Total admitted cost. Monotonically non-decreasing within a
    /// sequence.
    pub counter: i64,
}

impl Window {
    /// Creates an empty window for the given sequence.
    #[must_use]
    pub fn new(sequence: i64, duration_ms: i64) -> Self {
        Self { sequence, start_ms: sequence * duration_ms, duration_ms, counter: 0 }
    }

    /// Returns the window's lifecycle state at `now_ms`.
    #[must_use]
    pub fn state(&self, now_ms: i64) -> WindowState {
        if now_ms < self.start_ms + self.duration_ms {
            WindowState::Active
        } else if now_ms < self.start_ms + 2 * self.duration_ms {
            WindowState::Stale
        } else {
            WindowState::Evicted
        }
    }
}

/// Outcome of a budget take.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RatelimitDecision {
    /// Whether the cost was admitted.
    pub success: bool,
    /// Budget left after this request (0 when denied).
    pub remaining: i64,
    /// Milliseconds until the current window rolls over.
    pub reset_ms: i64,
}

/// One window's worth of replicated state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowEntry {
    /// Budget fingerprint.
    pub fingerprint: u64,
    /// Window sequence.
    pub sequence: i64,
    /// Counter value.
    pub counter: i64,
    /// Window length (carried so replicas can place the window in time).
    pub duration_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct WindowKey {
    fingerprint: u64,
    sequence: i64,
}

/// Partitioned in-memory window map.
pub struct WindowStore {
    partitions: Vec<Mutex<HashMap<WindowKey, Window>>>,
}

impl WindowStore {
    /// Creates a store with the given number of partitions (at least 1).
    #[must_use]
    pub fn new(partitions: usize) -> Self {
        let partitions = partitions.max(1);
        Self { partitions: (0..partitions).map(|_| Mutex::new(HashMap::new())).collect() }
    }

    fn partition(&self, fingerprint: u64) -> &Mutex<HashMap<WindowKey, Window>> {
        let index = (fingerprint % self.partitions.len() as u64) as usize;
        &self.partitions[index]
    }

    /// Attempts to admit `cost` against the identifier's sliding budget.
    ///
    /// Loads (creating if missing) the current window, reads the previous
    /// one, and applies the sliding estimate under the partition lock so
    /// increments for one fingerprint are serialized and monotonic.
    pub fn take(
        &self,
        fingerprint: u64,
        id: &RatelimitIdentifier,
        cost: i64,
        now_ms: i64,
    ) -> RatelimitDecision {
        let duration = id.duration_ms;
        if duration <= 0 || id.limit <= 0 {
            tracing::warn!(
                namespace = %id.namespace,
                duration_ms = duration,
                limit = id.limit,
                "rejecting take on degenerate rate-limit identifier"
            );
            return RatelimitDecision { success: false, remaining: 0, reset_ms: 0 };
        }

        let current_seq = now_ms.div_euclid(duration);
        let elapsed_frac = now_ms.rem_euclid(duration) as f64 / duration as f64;
        let reset_ms = (current_seq + 1) * duration - now_ms;

        let mut windows = self.partition(fingerprint).lock();
        let prev_counter = windows
            .get(&WindowKey { fingerprint, sequence: current_seq - 1 })
            .map_or(0, |window| window.counter);
        let current = windows
            .entry(WindowKey { fingerprint, sequence: current_seq })
            .or_insert_with(|| Window::new(current_seq, duration));

        let estimated = prev_counter as f64 * (1.0 - elapsed_frac) + current.counter as f64;
        if estimated + cost as f64 > id.limit as f64 {
            RatelimitDecision { success: false, remaining: 0, reset_ms }
        } else {
            current.counter += cost;
            let remaining = (id.limit - estimated.ceil() as i64 - cost).max(0);
            RatelimitDecision { success: true, remaining, reset_ms }
        }
    }

    /// Applies a replicated increment from the owning node.
    ///
    /// Only Active windows accept increments; late deltas for stale
    /// windows are discarded (the periodic snapshot merge heals any gap).
    pub fn apply_increment(
        &self,
        fingerprint: u64,
        sequence: i64,
        delta: i64,
        duration_ms: i64,
        now_ms: i64,
    ) {
        if duration_ms <= 0 || delta <= 0 {
            return;
        }
        let probe = Window::new(sequence, duration_ms);
        if probe.state(now_ms) != WindowState::Active {
            return;
        }
        let mut windows = self.partition(fingerprint).lock();
        let window = windows
            .entry(WindowKey { fingerprint, sequence })
            .or_insert(probe);
        window.counter += delta;
    }

    /// Merges replicated full state by per-component `max`.
    ///
    /// The merge is a join in the max semilattice: commutative,
    /// associative, idempotent, so any gossip order converges.
    pub fn merge_snapshot(
        &self,
        fingerprint: u64,
        sequence: i64,
        counter: i64,
        duration_ms: i64,
        now_ms: i64,
    ) {
        if duration_ms <= 0 || counter <= 0 {
            return;
        }
        let probe = Window::new(sequence, duration_ms);
        if probe.state(now_ms) == WindowState::Evicted {
            return;
        }
        let mut windows = self.partition(fingerprint).lock();
        let window = windows
            .entry(WindowKey { fingerprint, sequence })
            .or_insert(probe);
        window.counter = window.counter.max(counter);
    }

    /// Evicts windows past `start + 2*duration`. Returns how many died.
    pub fn gc(&self, now_ms: i64) -> usize {
        let mut evicted = 0;
        for partition in &self.partitions {
            let mut windows = partition.lock();
            let before = windows.len();
            windows.retain(|_, window| window.state(now_ms) != WindowState::Evicted);
            evicted += before - windows.len();
        }
        if evicted > 0 {
            tracing::debug!(evicted, "window gc");
        }
        evicted
    }

    /// Returns the live window state for gossip snapshots.
    #[must_use]
    pub fn entries(&self) -> Vec<WindowEntry> {
        let mut entries = Vec::new();
        for partition in &self.partitions {
            let windows = partition.lock();
            entries.extend(windows.iter().map(|(key, window)| WindowEntry {
                fingerprint: key.fingerprint,
                sequence: key.sequence,
                counter: window.counter,
                duration_ms: window.duration_ms,
            }));
        }
        entries
    }

    /// Returns the counter for one window, if present.
    #[must_use]
    pub fn counter(&self, fingerprint: u64, sequence: i64) -> Option<i64> {
        self.partition(fingerprint)
            .lock()
            .get(&WindowKey { fingerprint, sequence })
            .map(|window| window.counter)
    }

    /// Returns the number of live windows across all partitions.
    #[must_use]
    pub fn window_count(&self) -> usize {
        self.partitions.iter().map(|partition| partition.lock().len()).sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn id(duration_ms: i64, limit: i64) -> RatelimitIdentifier {
        RatelimitIdentifier::new("api", "key_1", duration_ms, limit)
    }

    #[test]
    fn window_states_progress_with_time() {
        let window = Window::new(5, 1_000);
        assert_eq!(window.start_ms, 5_000);
        assert_eq!(window.state(5_500), WindowState::Active);
        assert_eq!(window.state(6_500), WindowState::Stale);
        assert_eq!(window.state(7_000), WindowState::Evicted);
    }

    #[test]
    fn burst_within_limit_counts_down_remaining() {
        let store = WindowStore::new(4);
        let id = id(1_000, 10);
        let fp = id.fingerprint();
        let now = 42_000; // exactly at a window boundary

        for expected_remaining in (0..10).rev() {
            let decision = store.take(fp, &id, 1, now);
            assert!(decision.success);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = store.take(fp, &id, 1, now);
        assert!(!denied.success);
        assert_eq!(denied.remaining, 0);
        assert!(denied.reset_ms > 0 && denied.reset_ms <= 1_000, "reset={}", denied.reset_ms);
    }

    #[test]
    fn sliding_estimate_blends_previous_window() {
        let store = WindowStore::new(4);
        let id = id(1_000, 100);
        let fp = id.fingerprint();

        // Seed: previous window holds 80, current holds 20.
        store.merge_snapshot(fp, 9, 80, 1_000, 9_500);
        store.merge_snapshot(fp, 10, 20, 1_000, 10_000);

        // Halfway through sequence 10: estimated = 80*0.5 + 20 = 60.
        let decision = store.take(fp, &id, 1, 10_500);
        assert!(decision.success);
        assert_eq!(decision.remaining, 39);
        assert_eq!(decision.reset_ms, 500);
    }

    #[test]
    fn estimate_denies_before_counter_alone_would() {
        let store = WindowStore::new(4);
        let id = id(1_000, 100);
        let fp = id.fingerprint();

        store.merge_snapshot(fp, 9, 100, 1_000, 9_999);

        // Just after rollover nearly all of the previous window counts.
        let decision = store.take(fp, &id, 10, 10_010);
        assert!(!decision.success, "estimated ~99 + 10 must exceed 100");
    }

    #[test]
    fn increments_apply_only_to_active_windows() {
        let store = WindowStore::new(4);

        store.apply_increment(7, 10, 5, 1_000, 10_500);
        assert_eq!(store.counter(7, 10), Some(5));

        // Sequence 10 is stale at 11_500: the delta is dropped.
        store.apply_increment(7, 10, 5, 1_000, 11_500);
        assert_eq!(store.counter(7, 10), Some(5));

        // Evicted-age sequences are never created.
        store.apply_increment(7, 3, 5, 1_000, 10_500);
        assert_eq!(store.counter(7, 3), None);
    }

    #[test]
    fn snapshot_merge_is_max_and_idempotent() {
        let store = WindowStore::new(4);

        store.merge_snapshot(7, 10, 30, 1_000, 10_500);
        store.merge_snapshot(7, 10, 20, 1_000, 10_500);
        assert_eq!(store.counter(7, 10), Some(30), "lower snapshot must not regress");

        store.merge_snapshot(7, 10, 30, 1_000, 10_500);
        assert_eq!(store.counter(7, 10), Some(30), "idempotent");

        store.merge_snapshot(7, 10, 45, 1_000, 10_500);
        assert_eq!(store.counter(7, 10), Some(45));
    }

    #[test]
    fn divergent_stores_converge_under_pairwise_merge() {
        let a = WindowStore::new(4);
        let b = WindowStore::new(4);
        let now = 10_500;

        a.merge_snapshot(7, 10, 40, 1_000, now);
        a.merge_snapshot(8, 10, 5, 1_000, now);
        b.merge_snapshot(7, 10, 25, 1_000, now);
        b.merge_snapshot(9, 10, 12, 1_000, now);

        // Exchange full snapshots in both directions.
        for entry in a.entries() {
            b.merge_snapshot(entry.fingerprint, entry.sequence, entry.counter, entry.duration_ms, now);
        }
        for entry in b.entries() {
            a.merge_snapshot(entry.fingerprint, entry.sequence, entry.counter, entry.duration_ms, now);
        }

        for fingerprint in [7, 8, 9] {
            assert_eq!(
                a.counter(fingerprint, 10),
                b.counter(fingerprint, 10),
                "fingerprint {fingerprint} diverged"
            );
        }
        assert_eq!(a.counter(7, 10), Some(40), "pairwise max");
    }

    #[test]
    fn gc_reclaims_expired_windows() {
        let store = WindowStore::new(4);
        store.merge_snapshot(1, 10, 5, 1_000, 10_500);
        store.merge_snapshot(2, 10, 5, 1_000, 10_500);
        assert_eq!(store.window_count(), 2);

        // At 12_000 both windows (start 10_000, duration 1_000) are dead.
        let evicted = store.gc(12_000);
        assert_eq!(evicted, 2);
        assert_eq!(store.window_count(), 0);
    }

    #[test]
    fn degenerate_identifiers_are_denied() {
        let store = WindowStore::new(4);
        let zero_duration = RatelimitIdentifier::new("api", "k", 0, 10);
        let decision = store.take(zero_duration.fingerprint(), &zero_duration, 1, 1_000);
        assert!(!decision.success);
    }

    #[test]
    fn fingerprints_do_not_share_budgets() {
        let store = WindowStore::new(4);
        let a = RatelimitIdentifier::new("api", "key_a", 1_000, 2);
        let b = RatelimitIdentifier::new("api", "key_b", 1_000, 2);
        let now = 5_000;

        assert!(store.take(a.fingerprint(), &a, 2, now).success);
        assert!(!store.take(a.fingerprint(), &a, 1, now).success);
        assert!(store.take(b.fingerprint(), &b, 1, now).success, "b has its own budget");
    }
}
