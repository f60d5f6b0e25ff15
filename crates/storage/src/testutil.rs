//! Shared test utilities for key store testing.
//!
//! Provides deterministic record builders and [`FlakyKeyStore`], a wrapper
//! that injects scripted failures into any [`KeyStore`]. Feature-gated
//! behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! keygrid-storage = { path = "../storage", features = ["testutil"] }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    error::{StorageError, StorageResult},
    store::KeyStore,
    types::{KeyHash, KeyId, KeyRecord, KeyStatus, WorkspaceId},
};

/// Builds an active, non-expiring key record for tests.
#[must_use]
pub fn active_key(key_id: &str, workspace_id: &str) -> KeyRecord {
    KeyRecord {
        key_id: KeyId::from(key_id),
        workspace_id: WorkspaceId::from(workspace_id),
        status: KeyStatus::Active,
        expires_at: None,
        remaining_uses: None,
        created_at: Utc::now(),
    }
}

/// Builds an active key record expiring at the given instant.
#[must_use]
pub fn expiring_key(key_id: &str, workspace_id: &str, expires_at: DateTime<Utc>) -> KeyRecord {
    KeyRecord { expires_at: Some(expires_at), ..active_key(key_id, workspace_id) }
}

/// Failure script for [`FlakyKeyStore`].
enum FailureMode {
    /// Operate normally.
    None,
    /// Fail the next `remaining` calls with clones of `error`.
    Counted { remaining: u64, error: StorageError },
    /// Fail every call with clones of `error`.
    Always(StorageError),
}

/// A [`KeyStore`] wrapper that injects scripted failures.
///
/// Useful for exercising retry, fallback and stale-serving paths without
/// a real flaky backend. Failure scripts apply to both read operations.
pub struct FlakyKeyStore<S> {
    inner: S,
    mode: Mutex<FailureMode>,
    calls: AtomicU64,
}

impl<S: KeyStore> FlakyKeyStore<S> {
    /// Wraps `inner` with no failures scripted.
    pub fn new(inner: S) -> Self {
        Self { inner, mode: Mutex::new(FailureMode::None), calls: AtomicU64::new(0) }
    }

    /// Fails the next `count` operations with clones of `error`, then
    /// resumes normal operation.
    pub fn fail_next(&self, count: u64, error: StorageError) {
        *self.mode.lock() = FailureMode::Counted { remaining: count, error };
    }

    /// Fails every operation until [`heal`](Self::heal) is called.
    pub fn fail_always(&self, error: StorageError) {
        *self.mode.lock() = FailureMode::Always(error);
    }

    /// Clears any scripted failure.
    pub fn heal(&self) {
        *self.mode.lock() = FailureMode::None;
    }

    /// Total operations attempted, including failed ones.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Returns a reference to the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut mode = self.mode.lock();
        match &mut *mode {
            FailureMode::None => Ok(()),
            FailureMode::Counted { remaining, error } => {
                if *remaining == 0 {
                    *mode = FailureMode::None;
                    Ok(())
                } else {
                    *remaining -= 1;
                    Err(error.clone())
                }
            },
            FailureMode::Always(error) => Err(error.clone()),
        }
    }
}

#[async_trait]
impl<S: KeyStore> KeyStore for FlakyKeyStore<S> {
    async fn find_key_by_hash(&self, hash: &KeyHash) -> StorageResult<Option<KeyRecord>> {
        self.check()?;
        self.inner.find_key_by_hash(hash).await
    }

    async fn find_permissions_for_key(&self, key_id: &KeyId) -> StorageResult<Vec<String>> {
        self.check()?;
        self.inner.find_permissions_for_key(key_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryKeyStore;

    #[tokio::test]
    async fn counted_failures_then_recovery() {
        let inner = MemoryKeyStore::new();
        inner.insert_key(KeyHash::from("h1"), active_key("k1", "ws_1"));
        let flaky = FlakyKeyStore::new(inner);
        flaky.fail_next(2, StorageError::unavailable("blip"));

        assert!(flaky.find_key_by_hash(&KeyHash::from("h1")).await.is_err());
        assert!(flaky.find_key_by_hash(&KeyHash::from("h1")).await.is_err());
        assert!(flaky.find_key_by_hash(&KeyHash::from("h1")).await.unwrap().is_some());
        assert_eq!(flaky.call_count(), 3);
    }

    #[tokio::test]
    async fn heal_clears_permanent_failure() {
        let flaky = FlakyKeyStore::new(MemoryKeyStore::new());
        flaky.fail_always(StorageError::timeout());
        assert!(flaky.find_permissions_for_key(&KeyId::from("k1")).await.is_err());

        flaky.heal();
        assert!(flaky.find_permissions_for_key(&KeyId::from("k1")).await.is_ok());
    }
}
