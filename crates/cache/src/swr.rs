//! Stale-while-revalidate cache with single-flight loads.
//!
//! [`SwrCache`] is the request-path cache that shields the relational store.
//! Its one interesting operation is [`swr`](SwrCache::swr):
//!
//! 1. Fresh entry → return the value immediately.
//! 2. Stale entry → return the value immediately *and* schedule one
//!    asynchronous refresh.
//! 3. Absent entry → block on the loader; a `decide` callback chooses the
//!    caching policy for the outcome ([`CacheDecision`]).
//! 4. Concurrent calls for the same key share a single loader invocation;
//!    followers observe the first caller's result.
//!
//! # Single-flight leadership
//!
//! The loader always runs in a spawned task, never inline in the calling
//! future. A cancelled caller therefore cannot starve followers: the load
//! completes and publishes regardless. Followers wait on a `watch` channel
//! with a bounded timeout and re-elect a new leader if the producing task
//! dies without publishing.
//!
//! # Storage
//!
//! Entries live in a `moka` cache, which supplies the capacity bound with
//! recency-based eviction and lazy per-entry expiry at `stale_until`; a
//! periodic sweeper flushes moka's pending housekeeping.

use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use moka::{Expiry, notification::RemovalCause};
use parking_lot::Mutex;
use tokio::{sync::watch, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::SwrConfig,
    entry::{CacheDecision, CacheEntry, LoadOutcome},
    error::CacheError,
    metrics::CacheMetrics,
};

/// Expiry policy delegating to each entry's `stale_until`.
struct EntryExpiry;

impl<K, V> Expiry<K, Arc<CacheEntry<V>>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &K,
        value: &Arc<CacheEntry<V>>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.stale_until.saturating_duration_since(Instant::now()))
    }

    fn expire_after_update(
        &self,
        _key: &K,
        value: &Arc<CacheEntry<V>>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.stale_until.saturating_duration_since(Instant::now()))
    }
}

/// A registered in-flight load.
///
/// The generation disambiguates successive flights for the same key, so a
/// caller cleaning up after a dead leader cannot remove a newer flight.
struct InflightLoad<V> {
    generation: u64,
    rx: watch::Receiver<Option<LoadOutcome<V>>>,
}

struct Shared<K, V> {
    entries: moka::sync::Cache<K, Arc<CacheEntry<V>>>,
    inflight: Mutex<HashMap<K, InflightLoad<V>>>,
    config: SwrConfig,
    metrics: CacheMetrics,
    next_generation: AtomicU64,
}

impl<K, V> Shared<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Writes (or skips) a cache entry according to the caller's decision.
    fn apply_decision(&self, key: &K, outcome: &LoadOutcome<V>, decision: CacheDecision) {
        let now = Instant::now();
        match decision {
            CacheDecision::Noop => {},
            CacheDecision::WriteValue => {
                // A failed load carries nothing to write.
                if let Ok(value) = outcome {
                    let entry = CacheEntry::new(
                        value.clone(),
                        now + self.config.fresh_ttl,
                        now + self.config.stale_ttl,
                    );
                    self.entries.insert(key.clone(), Arc::new(entry));
                }
            },
            CacheDecision::WriteNull => {
                let expiry = now + self.config.negative_ttl;
                self.entries.insert(key.clone(), Arc::new(CacheEntry::new(None, expiry, expiry)));
            },
        }
    }

    /// Removes the in-flight registration, but only if it still belongs to
    /// the given generation.
    fn deregister(&self, key: &K, generation: u64) {
        let mut inflight = self.inflight.lock();
        if inflight.get(key).is_some_and(|flight| flight.generation == generation) {
            inflight.remove(key);
        }
    }
}

/// Role a caller plays in a single-flight load.
enum Role<V> {
    Leader { tx: watch::Sender<Option<LoadOutcome<V>>>, rx: watch::Receiver<Option<LoadOutcome<V>>>, generation: u64 },
    Follower { rx: watch::Receiver<Option<LoadOutcome<V>>>, generation: u64 },
    /// This caller's own load task died earlier and its loader is spent.
    Spent,
}

/// Typed keyed cache with TTL, stale-while-revalidate and single-flight
/// refresh.
///
/// Cheaply cloneable; all clones share the same entries and in-flight
/// registry.
pub struct SwrCache<K, V> {
    inner: Arc<Shared<K, V>>,
}

impl<K, V> Clone for SwrCache<K, V> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K, V> SwrCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache with the given configuration.
    #[must_use]
    pub fn new(config: SwrConfig) -> Self {
        let metrics = CacheMetrics::new();
        let eviction_metrics = metrics.clone();
        let entries = moka::sync::Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(EntryExpiry)
            .eviction_listener(move |_key, _value, cause| {
                if matches!(cause, RemovalCause::Expired | RemovalCause::Size) {
                    eviction_metrics.record_eviction();
                }
            })
            .build();
        Self {
            inner: Arc::new(Shared {
                entries,
                inflight: Mutex::new(HashMap::new()),
                config,
                metrics,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the cache metrics handle.
    #[must_use]
    pub fn metrics(&self) -> &CacheMetrics {
        &self.inner.metrics
    }

    /// Serves `key` with stale-while-revalidate semantics.
    ///
    /// `loader` must be idempotent: the cache may invoke it zero times (on
    /// a hit or when following another caller's load) or once (as leader or
    /// background refresher). `decide` maps the loader outcome to a
    /// [`CacheDecision`]; use [`CacheDecision::WriteNull`] to negatively
    /// cache definitive absence.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Load`] when the loader fails and no stale value exists
    /// - [`CacheError::LoadTimeout`] when the load outlives the configured timeout
    /// - [`CacheError::LoadTaskFailed`] when this caller's own load task died
    ///   without a result (loader panic)
    pub async fn swr<L, Fut, D>(
        &self,
        key: K,
        loader: L,
        decide: D,
    ) -> Result<Option<V>, CacheError>
    where
        L: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = LoadOutcome<V>> + Send + 'static,
        D: FnOnce(&LoadOutcome<V>) -> CacheDecision + Send + 'static,
    {
        let now = Instant::now();
        if let Some(entry) = self.inner.entries.get(&key) {
            if !entry.is_expired(now) {
                if entry.is_fresh(now) {
                    self.inner.metrics.record_hit(entry.value.is_none());
                    return Ok(entry.value.clone());
                }
                // Stale: serve immediately, refresh at most once.
                self.inner.metrics.record_stale_hit();
                if entry.claim_refresh() {
                    self.spawn_refresh(key, loader, decide);
                }
                return Ok(entry.value.clone());
            }
            // Dead entry the store has not reaped yet.
            self.inner.entries.invalidate(&key);
        }

        self.inner.metrics.record_miss();
        self.load(key, loader, decide).await
    }

    /// Removes the entry for `key`, if any.
    pub fn invalidate(&self, key: &K) {
        self.inner.entries.invalidate(key);
    }

    /// Flushes the entry store's pending housekeeping (expiry, eviction).
    ///
    /// Called periodically by the sweeper; tests call it directly before
    /// asserting on [`entry_count`](Self::entry_count).
    pub fn run_maintenance(&self) {
        self.inner.entries.run_pending_tasks();
    }

    /// Returns the approximate number of live entries.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entries.entry_count()
    }

    /// Spawns the periodic sweeper task.
    ///
    /// The returned handle stops the task on
    /// [`shutdown`](SweeperHandle::shutdown); dropping the handle leaves the
    /// task running for the life of the runtime.
    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
        let shared = Arc::clone(&self.inner);
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    _ = ticker.tick() => shared.entries.run_pending_tasks(),
                }
            }
            tracing::debug!("cache sweeper stopped");
        });
        SweeperHandle { token, handle }
    }

    /// Runs `loader` in a detached task and applies its outcome, releasing
    /// the entry's refresh claim when done.
    fn spawn_refresh<L, Fut, D>(&self, key: K, loader: L, decide: D)
    where
        L: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = LoadOutcome<V>> + Send + 'static,
        D: FnOnce(&LoadOutcome<V>) -> CacheDecision + Send + 'static,
    {
        let shared = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = loader().await;
            let failed = outcome.is_err();
            if let Err(err) = &outcome {
                tracing::warn!(error = %err, "cache refresh failed; serving stale until expiry");
            }
            let decision = decide(&outcome);
            shared.apply_decision(&key, &outcome, decision);
            if let Some(entry) = shared.entries.get(&key) {
                entry.finish_refresh();
            }
            shared.metrics.record_refresh(failed);
        });
    }

    /// Blocking-load path with single-flight collapsing.
    async fn load<L, Fut, D>(
        &self,
        key: K,
        loader: L,
        decide: D,
    ) -> Result<Option<V>, CacheError>
    where
        L: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = LoadOutcome<V>> + Send + 'static,
        D: FnOnce(&LoadOutcome<V>) -> CacheDecision + Send + 'static,
    {
        let mut ammo = Some((loader, decide));
        let deadline = tokio::time::Instant::now() + self.inner.config.load_timeout;

        loop {
            let role = {
                let mut inflight = self.inner.inflight.lock();
                if let Some(flight) = inflight.get(&key) {
                    Role::Follower { rx: flight.rx.clone(), generation: flight.generation }
                } else if ammo.is_some() {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    inflight
                        .insert(key.clone(), InflightLoad { generation, rx: rx.clone() });
                    Role::Leader { tx, rx, generation }
                } else {
                    Role::Spent
                }
            };

            let (mut rx, generation) = match role {
                Role::Leader { tx, rx, generation } => {
                    let Some((loader, decide)) = ammo.take() else {
                        // Checked under the lock; a missing loader here is a bug.
                        self.inner.deregister(&key, generation);
                        return Err(CacheError::LoadTaskFailed);
                    };
                    let shared = Arc::clone(&self.inner);
                    let task_key = key.clone();
                    tokio::spawn(async move {
                        let outcome = loader().await;
                        let decision = decide(&outcome);
                        shared.apply_decision(&task_key, &outcome, decision);
                        // Deregister before publishing so a caller that saw
                        // the outcome never joins this finished flight.
                        shared.deregister(&task_key, generation);
                        let _ = tx.send(Some(outcome));
                    });
                    (rx, generation)
                },
                Role::Follower { rx, generation } => {
                    self.inner.metrics.record_followed_load();
                    (rx, generation)
                },
                Role::Spent => return Err(CacheError::LoadTaskFailed),
            };

            let wait = async {
                loop {
                    let published = rx.borrow_and_update().clone();
                    if let Some(outcome) = published {
                        return Some(outcome);
                    }
                    if rx.changed().await.is_err() {
                        // Producer dropped without publishing.
                        return None;
                    }
                }
            };

            match tokio::time::timeout_at(deadline, wait).await {
                Err(_) => return Err(CacheError::LoadTimeout),
                Ok(Some(outcome)) => return outcome.map_err(CacheError::load),
                Ok(None) => {
                    // The flight died (loader panic). Clear it if it is
                    // still registered and elect again.
                    self.inner.deregister(&key, generation);
                },
            }
        }
    }
}

/// Handle to the background sweeper task.
pub struct SweeperHandle {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}
