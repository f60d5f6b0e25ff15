//! Replica-first key store with primary fallback.
//!
//! Production deployments read from a replica to keep load off the primary.
//! [`ReplicaKeyStore`] wraps two [`KeyStore`] implementations: reads go to
//! the replica with bounded retry on transient errors, then fall back to
//! the primary. A definitive answer from the replica — including `None` —
//! is returned as-is; replica lag on freshly-created keys is absorbed by
//! the verifier's negative-cache TTL rather than by hammering the primary.
//!
//! # Backoff Strategy
//!
//! Retries use exponential backoff with jitter:
//! - Base delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - Random jitter of 0–50% of the computed delay is added to prevent
//!   thundering-herd effects across multiple frontend nodes

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use rand::Rng;

use crate::{
    error::{ConfigError, StorageError, StorageResult},
    store::KeyStore,
    types::{KeyHash, KeyId, KeyRecord},
};

/// Default number of replica retries before falling back to the primary.
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default initial backoff between replica retries.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(25);

/// Default backoff cap.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Retry configuration for replica reads.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryConfig {
    /// Creates a validated retry configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `initial_backoff` is zero or greater than
    /// `max_backoff`. `max_retries` of zero is valid and disables retries.
    pub fn new(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
    ) -> Result<Self, ConfigError> {
        if initial_backoff.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "initial_backoff",
                value: format!("{}ms", initial_backoff.as_millis()),
            });
        }
        if initial_backoff > max_backoff {
            return Err(ConfigError::InvalidRelation {
                field_a: "initial_backoff",
                value_a: format!("{}ms", initial_backoff.as_millis()),
                field_b: "max_backoff",
                value_b: format!("{}ms", max_backoff.as_millis()),
            });
        }
        Ok(Self { max_retries, initial_backoff, max_backoff })
    }

    /// Returns the number of retries after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Computes the backoff delay for the given attempt, with jitter.
fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let base = exp.min(config.max_backoff);
    let jitter = rand::thread_rng().gen_range(0.0..=0.5);
    base.mul_f64(1.0 + jitter)
}

/// Counters describing replica read behavior.
#[derive(Debug, Default)]
struct ReplicaCounters {
    replica_reads: AtomicU64,
    retries: AtomicU64,
    primary_fallbacks: AtomicU64,
    primary_failures: AtomicU64,
}

/// Snapshot of [`ReplicaKeyStore`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaMetricsSnapshot {
    /// Reads attempted against the replica.
    pub replica_reads: u64,
    /// Individual replica retry attempts.
    pub retries: u64,
    /// Reads that fell back to the primary after replica exhaustion.
    pub primary_fallbacks: u64,
    /// Fallback reads where the primary also failed.
    pub primary_failures: u64,
}

/// A [`KeyStore`] that reads from a replica with primary fallback.
pub struct ReplicaKeyStore<R, P> {
    replica: R,
    primary: P,
    retry: RetryConfig,
    counters: Arc<ReplicaCounters>,
}

impl<R, P> ReplicaKeyStore<R, P>
where
    R: KeyStore,
    P: KeyStore,
{
    /// Wraps a replica and a primary store with the default retry policy.
    pub fn new(replica: R, primary: P) -> Self {
        Self::with_retry(replica, primary, RetryConfig::default())
    }

    /// Wraps a replica and a primary store with a custom retry policy.
    pub fn with_retry(replica: R, primary: P, retry: RetryConfig) -> Self {
        Self { replica, primary, retry, counters: Arc::new(ReplicaCounters::default()) }
    }

    /// Returns a snapshot of the replica read counters.
    #[must_use]
    pub fn metrics_snapshot(&self) -> ReplicaMetricsSnapshot {
        ReplicaMetricsSnapshot {
            replica_reads: self.counters.replica_reads.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            primary_fallbacks: self.counters.primary_fallbacks.load(Ordering::Relaxed),
            primary_failures: self.counters.primary_failures.load(Ordering::Relaxed),
        }
    }

    /// Runs `replica_op` with retry, then `primary_op` as a fallback when
    /// the replica keeps failing transiently.
    ///
    /// Non-transient replica errors propagate immediately — a decode
    /// failure will not look different on the primary.
    async fn read<T, RF, RFut, PF, PFut>(
        &self,
        operation_name: &str,
        mut replica_op: RF,
        primary_op: PF,
    ) -> StorageResult<T>
    where
        RF: FnMut() -> RFut,
        RFut: Future<Output = StorageResult<T>>,
        PF: FnOnce() -> PFut,
        PFut: Future<Output = StorageResult<T>>,
    {
        self.counters.replica_reads.fetch_add(1, Ordering::Relaxed);

        let mut last_error: Option<StorageError> = None;
        for attempt in 0..=self.retry.max_retries {
            match replica_op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            "replica read succeeded after retry",
                        );
                    }
                    return Ok(value);
                },
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = compute_backoff(&self.retry, attempt);
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient replica error, retrying after backoff",
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(err);
                },
                Err(err) if err.is_transient() => {
                    last_error = Some(err);
                    break;
                },
                Err(err) => return Err(err),
            }
        }

        // Replica exhausted on transient errors — fall back to the primary.
        self.counters.primary_fallbacks.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            operation = operation_name,
            error = ?last_error,
            "replica exhausted, falling back to primary",
        );
        match primary_op().await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.counters.primary_failures.fetch_add(1, Ordering::Relaxed);
                Err(err)
            },
        }
    }
}

#[async_trait]
impl<R, P> KeyStore for ReplicaKeyStore<R, P>
where
    R: KeyStore,
    P: KeyStore,
{
    async fn find_key_by_hash(&self, hash: &KeyHash) -> StorageResult<Option<KeyRecord>> {
        self.read(
            "find_key_by_hash",
            || self.replica.find_key_by_hash(hash),
            || self.primary.find_key_by_hash(hash),
        )
        .await
    }

    async fn find_permissions_for_key(&self, key_id: &KeyId) -> StorageResult<Vec<String>> {
        self.read(
            "find_permissions_for_key",
            || self.replica.find_permissions_for_key(key_id),
            || self.primary.find_permissions_for_key(key_id),
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        memory::MemoryKeyStore,
        testutil::FlakyKeyStore,
        types::{KeyStatus, WorkspaceId},
    };

    fn record(key_id: &str) -> KeyRecord {
        KeyRecord {
            key_id: KeyId::from(key_id),
            workspace_id: WorkspaceId::from("ws_1"),
            status: KeyStatus::Active,
            expires_at: None,
            remaining_uses: None,
            created_at: Utc::now(),
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(2, Duration::from_millis(1), Duration::from_millis(2)).unwrap()
    }

    #[test]
    fn config_rejects_zero_backoff() {
        let result = RetryConfig::new(1, Duration::ZERO, Duration::from_millis(10));
        assert!(matches!(result, Err(ConfigError::MustBePositive { field: "initial_backoff", .. })));
    }

    #[test]
    fn config_rejects_inverted_bounds() {
        let result = RetryConfig::new(1, Duration::from_millis(100), Duration::from_millis(10));
        assert!(matches!(result, Err(ConfigError::InvalidRelation { .. })));
    }

    #[test]
    fn backoff_is_capped() {
        let config =
            RetryConfig::new(10, Duration::from_millis(10), Duration::from_millis(40)).unwrap();
        // At attempt 8 the exponential term is 2560ms; the cap plus maximum
        // jitter bounds the delay at 60ms.
        let delay = compute_backoff(&config, 8);
        assert!(delay <= Duration::from_millis(60), "delay={delay:?}");
    }

    #[tokio::test]
    async fn healthy_replica_serves_reads() {
        let replica = MemoryKeyStore::new();
        replica.insert_key(KeyHash::from("h1"), record("k1"));
        let primary = MemoryKeyStore::new();

        let store = ReplicaKeyStore::new(replica, primary);
        let found = store.find_key_by_hash(&KeyHash::from("h1")).await.unwrap();
        assert!(found.is_some());
        assert_eq!(store.metrics_snapshot().primary_fallbacks, 0);
    }

    #[tokio::test]
    async fn transient_replica_error_retries_then_succeeds() {
        let inner = MemoryKeyStore::new();
        inner.insert_key(KeyHash::from("h1"), record("k1"));
        let replica = FlakyKeyStore::new(inner);
        replica.fail_next(1, StorageError::unavailable("blip"));

        let store = ReplicaKeyStore::with_retry(replica, MemoryKeyStore::new(), fast_retry());
        let found = store.find_key_by_hash(&KeyHash::from("h1")).await.unwrap();
        assert!(found.is_some());

        let snap = store.metrics_snapshot();
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.primary_fallbacks, 0);
    }

    #[tokio::test]
    async fn exhausted_replica_falls_back_to_primary() {
        let replica = FlakyKeyStore::new(MemoryKeyStore::new());
        replica.fail_always(StorageError::unavailable("replica down"));

        let primary = MemoryKeyStore::new();
        primary.insert_key(KeyHash::from("h1"), record("k1"));

        let store = ReplicaKeyStore::with_retry(replica, primary, fast_retry());
        let found = store.find_key_by_hash(&KeyHash::from("h1")).await.unwrap();
        assert!(found.is_some());
        assert_eq!(store.metrics_snapshot().primary_fallbacks, 1);
    }

    #[tokio::test]
    async fn replica_none_is_returned_without_fallback() {
        let replica = MemoryKeyStore::new();
        let primary = MemoryKeyStore::new();
        // The key exists only on the primary (simulated replica lag).
        primary.insert_key(KeyHash::from("h1"), record("k1"));

        let store = ReplicaKeyStore::new(replica, primary);
        let found = store.find_key_by_hash(&KeyHash::from("h1")).await.unwrap();
        assert!(found.is_none(), "replica None is definitive");
        assert_eq!(store.metrics_snapshot().primary_fallbacks, 0);
    }

    #[tokio::test]
    async fn non_transient_error_does_not_fall_back() {
        let replica = FlakyKeyStore::new(MemoryKeyStore::new());
        replica.fail_always(StorageError::corrupt("bad row"));

        let primary = MemoryKeyStore::new();
        primary.insert_key(KeyHash::from("h1"), record("k1"));

        let store = ReplicaKeyStore::with_retry(replica, primary, fast_retry());
        let err = store.find_key_by_hash(&KeyHash::from("h1")).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
        assert_eq!(store.metrics_snapshot().primary_fallbacks, 0);
    }

    #[tokio::test]
    async fn both_sides_failing_reports_primary_failure() {
        let replica = FlakyKeyStore::new(MemoryKeyStore::new());
        replica.fail_always(StorageError::unavailable("replica down"));
        let primary = FlakyKeyStore::new(MemoryKeyStore::new());
        primary.fail_always(StorageError::unavailable("primary down"));

        let store = ReplicaKeyStore::with_retry(replica, primary, fast_retry());
        let err = store.find_key_by_hash(&KeyHash::from("h1")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.metrics_snapshot().primary_failures, 1);
    }

    #[tokio::test]
    async fn permissions_read_uses_same_policy() {
        let replica = FlakyKeyStore::new(MemoryKeyStore::new());
        replica.fail_always(StorageError::unavailable("down"));

        let primary = MemoryKeyStore::new();
        primary.set_permissions(KeyId::from("k1"), vec!["docs.read".to_owned()]);

        let store = ReplicaKeyStore::with_retry(replica, primary, fast_retry());
        let grants = store.find_permissions_for_key(&KeyId::from("k1")).await.unwrap();
        assert_eq!(grants, vec!["docs.read"]);
    }
}
