//! Permission checks over cached granted sets.
//!
//! The service caches each key's flattened granted set under the SWR
//! policy and delegates evaluation to [`keygrid_rbac`]. Load failures keep
//! any stale set in place (`Noop` decision), so a store outage degrades to
//! slightly-old grants instead of failed checks.

use std::sync::Arc;

use keygrid_cache::{CacheDecision, SwrCache, SwrConfig};
use keygrid_rbac::{Evaluation, PermissionQuery, evaluate, parse};
use keygrid_storage::{BoxError, KeyId, KeyStore};

use crate::{error::AuthzError, metrics::CheckMetrics};

/// Cached permission checking for verified keys.
pub struct PermissionService {
    store: Arc<dyn KeyStore>,
    cache: SwrCache<KeyId, Arc<Vec<String>>>,
    metrics: CheckMetrics,
}

impl PermissionService {
    /// Creates a service with the default cache configuration.
    #[must_use]
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self::with_cache_config(store, SwrConfig::default())
    }

    /// Creates a service with a custom cache configuration.
    #[must_use]
    pub fn with_cache_config(store: Arc<dyn KeyStore>, config: SwrConfig) -> Self {
        Self { store, cache: SwrCache::new(config), metrics: CheckMetrics::new() }
    }

    /// Evaluates a parsed query against the key's granted set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::StoreUnavailable`] when the granted set could
    /// not be loaded and nothing (not even stale) was cached.
    pub async fn check(
        &self,
        key_id: &KeyId,
        query: &PermissionQuery,
    ) -> Result<Evaluation, AuthzError> {
        let granted = self.granted_set(key_id).await?;
        let result = evaluate(query, granted.as_slice());
        self.metrics.record_check(result.valid);
        if !result.valid {
            tracing::debug!(key_id = %key_id, missing = ?result.missing, "permission check denied");
        }
        Ok(result)
    }

    /// Parses query text, then evaluates it against the key's granted set.
    ///
    /// # Errors
    ///
    /// As [`check`](Self::check), plus [`AuthzError::QueryParse`] for text
    /// outside the grammar.
    pub async fn check_text(
        &self,
        key_id: &KeyId,
        query_text: &str,
    ) -> Result<Evaluation, AuthzError> {
        let query = parse(query_text)?;
        self.check(key_id, &query).await
    }

    /// Loads (through the cache) the flattened granted set for a key.
    async fn granted_set(&self, key_id: &KeyId) -> Result<Arc<Vec<String>>, AuthzError> {
        let store = Arc::clone(&self.store);
        let lookup = key_id.clone();
        let granted = self
            .cache
            .swr(
                key_id.clone(),
                move || async move {
                    store
                        .find_permissions_for_key(&lookup)
                        .await
                        .map(|grants| Some(Arc::new(grants)))
                        .map_err(|err| Arc::new(err) as BoxError)
                },
                // A load error retains whatever stale set exists.
                |outcome| match outcome {
                    Ok(_) => CacheDecision::WriteValue,
                    Err(_) => CacheDecision::Noop,
                },
            )
            .await
            .map_err(|err| {
                let err = AuthzError::from_cache(err);
                // Caller abandonment is not a store failure.
                if !matches!(err, AuthzError::Cancelled) {
                    self.metrics.record_load_error();
                }
                err
            })?;
        // The loader always yields Some; an empty grant list is a value.
        Ok(granted.unwrap_or_default())
    }

    /// Drops the cached granted set for a key (e.g. after a grant change
    /// is observed out-of-band).
    pub fn invalidate(&self, key_id: &KeyId) {
        self.cache.invalidate(key_id);
    }

    /// Returns the check metrics handle.
    #[must_use]
    pub fn metrics(&self) -> &CheckMetrics {
        &self.metrics
    }

    /// Returns the granted-set cache metrics handle.
    #[must_use]
    pub fn cache_metrics(&self) -> &keygrid_cache::CacheMetrics {
        self.cache.metrics()
    }
}
