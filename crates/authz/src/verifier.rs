//! Key verification: presented hash → workspace identity.
//!
//! The verifier sits directly on the request path. Lookups go through the
//! SWR cache ([`keygrid_cache`]): a missing key is negatively cached for a
//! short window so misses cannot stampede the store, and a present key is
//! cached as its raw record — status, expiry and usage checks re-run
//! against the injected clock on every call, so a cached record never
//! extends a key's validity.
//!
//! The verifier never mutates `remaining_uses`; decrementing is an
//! out-of-band writer's job so this path stays read-only.

use std::sync::Arc;

use keygrid_cache::{CacheDecision, SwrCache, SwrConfig};
use keygrid_storage::{BoxError, Clock, KeyHash, KeyId, KeyRecord, KeyStatus, KeyStore, WorkspaceId};

use crate::{
    error::AuthzError,
    metrics::{VerifyMetrics, VerifyOutcome},
};

/// A successfully verified key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedKey {
    /// The workspace the caller is authorized to act within.
    pub authorized_workspace_id: WorkspaceId,
    /// The verified key's record id.
    pub key_id: KeyId,
}

/// Hot-path key verifier.
pub struct KeyVerifier {
    store: Arc<dyn KeyStore>,
    cache: SwrCache<KeyHash, KeyRecord>,
    clock: Arc<dyn Clock>,
    metrics: VerifyMetrics,
}

impl KeyVerifier {
    /// Creates a verifier with the default cache configuration
    /// (60 s fresh / 5 min stale window for records, 30 s negative TTL).
    #[must_use]
    pub fn new(store: Arc<dyn KeyStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_cache_config(store, clock, SwrConfig::default())
    }

    /// Creates a verifier with a custom cache configuration.
    #[must_use]
    pub fn with_cache_config(
        store: Arc<dyn KeyStore>,
        clock: Arc<dyn Clock>,
        config: SwrConfig,
    ) -> Self {
        Self { store, cache: SwrCache::new(config), clock, metrics: VerifyMetrics::new() }
    }

    /// Verifies a presented key hash.
    ///
    /// # Errors
    ///
    /// - [`AuthzError::NotFound`] — no key for the hash (negatively cached)
    /// - [`AuthzError::Disabled`] — status is not active
    /// - [`AuthzError::Expired`] — `expires_at` has passed
    /// - [`AuthzError::UsageExhausted`] — `remaining_uses` is spent
    /// - [`AuthzError::StoreUnavailable`] — the store failed and nothing
    ///   (not even stale) was cached
    pub async fn verify(&self, hash: &KeyHash) -> Result<VerifiedKey, AuthzError> {
        let store = Arc::clone(&self.store);
        let lookup = hash.clone();
        let record = self
            .cache
            .swr(
                hash.clone(),
                move || async move {
                    store.find_key_by_hash(&lookup).await.map_err(|err| Arc::new(err) as BoxError)
                },
                |outcome| match outcome {
                    Ok(Some(_)) => CacheDecision::WriteValue,
                    Ok(None) => CacheDecision::WriteNull,
                    Err(_) => CacheDecision::Noop,
                },
            )
            .await
            .map_err(|err| {
                let err = AuthzError::from_cache(err);
                // Caller abandonment is not a store failure.
                if !matches!(err, AuthzError::Cancelled) {
                    self.metrics.record(VerifyOutcome::StoreError);
                }
                err
            })?;

        let Some(record) = record else {
            self.metrics.record(VerifyOutcome::NotFound);
            return Err(AuthzError::NotFound);
        };

        if record.status != KeyStatus::Active {
            self.metrics.record(VerifyOutcome::Disabled);
            tracing::debug!(key_id = %record.key_id, status = %record.status, "key rejected");
            return Err(AuthzError::Disabled);
        }
        if let Some(expires_at) = record.expires_at {
            if expires_at <= self.clock.now() {
                self.metrics.record(VerifyOutcome::Expired);
                return Err(AuthzError::Expired);
            }
        }
        if let Some(remaining_uses) = record.remaining_uses {
            if remaining_uses <= 0 {
                self.metrics.record(VerifyOutcome::UsageExhausted);
                return Err(AuthzError::UsageExhausted);
            }
        }

        self.metrics.record(VerifyOutcome::Ok);
        Ok(VerifiedKey {
            authorized_workspace_id: record.workspace_id,
            key_id: record.key_id,
        })
    }

    /// Drops the cached record for a hash (e.g. after an out-of-band
    /// status change is observed).
    pub fn invalidate(&self, hash: &KeyHash) {
        self.cache.invalidate(hash);
    }

    /// Returns the outcome metrics handle.
    #[must_use]
    pub fn metrics(&self) -> &VerifyMetrics {
        &self.metrics
    }

    /// Returns the record cache metrics handle.
    #[must_use]
    pub fn cache_metrics(&self) -> &keygrid_cache::CacheMetrics {
        self.cache.metrics()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;
    use keygrid_storage::{
        ManualClock, MemoryKeyStore, StorageError,
        testutil::{FlakyKeyStore, active_key, expiring_key},
    };

    use super::*;

    const T0_MS: i64 = 1_700_000_000_000;

    fn setup() -> (MemoryKeyStore, ManualClock, KeyVerifier) {
        let store = MemoryKeyStore::new();
        let clock = ManualClock::starting_at_ms(T0_MS);
        let verifier =
            KeyVerifier::new(Arc::new(store.clone()), Arc::new(clock.clone()));
        (store, clock, verifier)
    }

    #[tokio::test]
    async fn active_key_verifies_to_its_workspace() {
        let (store, _, verifier) = setup();
        store.insert_key(KeyHash::from("h1"), active_key("k1", "ws_1"));

        let verified = verifier.verify(&KeyHash::from("h1")).await.unwrap();
        assert_eq!(verified.authorized_workspace_id, WorkspaceId::from("ws_1"));
        assert_eq!(verified.key_id, KeyId::from("k1"));
        assert_eq!(verifier.metrics().snapshot().ok, 1);
    }

    #[tokio::test]
    async fn unknown_hash_is_not_found_and_negatively_cached() {
        let store = FlakyKeyStore::new(MemoryKeyStore::new());
        let clock = ManualClock::starting_at_ms(T0_MS);
        let verifier = KeyVerifier::new(Arc::new(store), Arc::new(clock));

        let err = verifier.verify(&KeyHash::from("ghost")).await.unwrap_err();
        assert!(matches!(err, AuthzError::NotFound));

        // The second miss is served from the negative cache.
        let err = verifier.verify(&KeyHash::from("ghost")).await.unwrap_err();
        assert!(matches!(err, AuthzError::NotFound));
        assert_eq!(verifier.cache_metrics().snapshot().negative_hits, 1);
    }

    #[tokio::test]
    async fn disabled_and_deleted_keys_are_rejected() {
        let (store, _, verifier) = setup();
        let mut disabled = active_key("k1", "ws_1");
        disabled.status = KeyStatus::Disabled;
        store.insert_key(KeyHash::from("h1"), disabled);
        let mut deleted = active_key("k2", "ws_1");
        deleted.status = KeyStatus::Deleted;
        store.insert_key(KeyHash::from("h2"), deleted);

        assert!(matches!(
            verifier.verify(&KeyHash::from("h1")).await.unwrap_err(),
            AuthzError::Disabled
        ));
        assert!(matches!(
            verifier.verify(&KeyHash::from("h2")).await.unwrap_err(),
            AuthzError::Disabled
        ));
        assert_eq!(verifier.metrics().snapshot().disabled, 2);
    }

    #[tokio::test]
    async fn expiry_is_evaluated_against_the_injected_clock() {
        let (store, clock, verifier) = setup();
        let expires_at = clock.now() + TimeDelta::seconds(10);
        store.insert_key(KeyHash::from("h1"), expiring_key("k1", "ws_1", expires_at));

        assert!(verifier.verify(&KeyHash::from("h1")).await.is_ok());

        // Cross the expiry without touching the store: the cached record
        // must re-evaluate against the clock.
        clock.advance_ms(10_001);
        let err = verifier.verify(&KeyHash::from("h1")).await.unwrap_err();
        assert!(matches!(err, AuthzError::Expired));
    }

    #[tokio::test]
    async fn expiry_boundary_is_inclusive() {
        let (store, clock, verifier) = setup();
        let expires_at = clock.now();
        store.insert_key(KeyHash::from("h1"), expiring_key("k1", "ws_1", expires_at));

        let err = verifier.verify(&KeyHash::from("h1")).await.unwrap_err();
        assert!(matches!(err, AuthzError::Expired), "expires_at <= now rejects");
    }

    #[tokio::test]
    async fn spent_usage_budget_rejects() {
        let (store, _, verifier) = setup();
        let mut key = active_key("k1", "ws_1");
        key.remaining_uses = Some(0);
        store.insert_key(KeyHash::from("h1"), key);

        let err = verifier.verify(&KeyHash::from("h1")).await.unwrap_err();
        assert!(matches!(err, AuthzError::UsageExhausted));

        // A positive budget passes and is never decremented here.
        store.update_key(&KeyHash::from("h1"), |record| record.remaining_uses = Some(3));
        verifier.invalidate(&KeyHash::from("h1"));
        assert!(verifier.verify(&KeyHash::from("h1")).await.is_ok());
        let record = store.find_key_by_hash(&KeyHash::from("h1")).await.unwrap().unwrap();
        assert_eq!(record.remaining_uses, Some(3), "read path must not decrement");
    }

    #[tokio::test]
    async fn repeated_verification_hits_the_cache() {
        let store = FlakyKeyStore::new(MemoryKeyStore::new());
        store.inner().insert_key(KeyHash::from("h1"), active_key("k1", "ws_1"));
        let clock = ManualClock::starting_at_ms(T0_MS);
        let store = Arc::new(store);
        let verifier = KeyVerifier::new(Arc::clone(&store) as Arc<dyn KeyStore>, Arc::new(clock));

        for _ in 0..5 {
            assert!(verifier.verify(&KeyHash::from("h1")).await.is_ok());
        }
        assert_eq!(store.call_count(), 1, "one store load for five verifications");
    }

    #[tokio::test]
    async fn store_outage_with_stale_record_still_verifies() {
        let store = Arc::new(FlakyKeyStore::new(MemoryKeyStore::new()));
        store.inner().insert_key(KeyHash::from("h1"), active_key("k1", "ws_1"));
        let clock = ManualClock::starting_at_ms(T0_MS);
        let config = SwrConfig::builder()
            .fresh_ttl(Duration::from_millis(30))
            .stale_ttl(Duration::from_secs(60))
            .build()
            .unwrap();
        let verifier = KeyVerifier::with_cache_config(
            Arc::clone(&store) as Arc<dyn KeyStore>,
            Arc::new(clock),
            config,
        );

        assert!(verifier.verify(&KeyHash::from("h1")).await.is_ok());

        // Let the entry go stale, then take the store down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.fail_always(StorageError::unavailable("replica down"));

        let verified = verifier.verify(&KeyHash::from("h1")).await;
        assert!(verified.is_ok(), "stale record must keep the hot path alive");
    }

    #[tokio::test]
    async fn store_outage_with_no_cache_surfaces_store_unavailable() {
        let store = Arc::new(FlakyKeyStore::new(MemoryKeyStore::new()));
        store.fail_always(StorageError::unavailable("down"));
        let clock = ManualClock::starting_at_ms(T0_MS);
        let verifier = KeyVerifier::new(Arc::clone(&store) as Arc<dyn KeyStore>, Arc::new(clock));

        let err = verifier.verify(&KeyHash::from("h1")).await.unwrap_err();
        assert_eq!(err.kind(), "StoreUnavailable");
        assert_eq!(verifier.metrics().snapshot().store_errors, 1);
    }
}
