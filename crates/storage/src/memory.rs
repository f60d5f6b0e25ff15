//! In-memory key store implementation.
//!
//! This module provides [`MemoryKeyStore`], an in-memory implementation of
//! [`KeyStore`] suitable for testing and development. Unlike the production
//! stores it also exposes write helpers so tests can seed keys and grants
//! directly.
//!
//! # Example
//!
//! ```
//! use keygrid_storage::{KeyHash, KeyStore, MemoryKeyStore};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemoryKeyStore::new();
//! let missing = store.find_key_by_hash(&KeyHash::from("absent")).await.unwrap();
//! assert!(missing.is_none());
//! # });
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    error::StorageResult,
    store::KeyStore,
    types::{KeyHash, KeyId, KeyRecord},
};

/// In-memory key store backed by hash maps.
///
/// Primarily intended for tests; all clones share the same underlying data.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    inner: std::sync::Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    keys_by_hash: HashMap<KeyHash, KeyRecord>,
    grants_by_key: HashMap<KeyId, Vec<String>>,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) a key record under the given hash.
    pub fn insert_key(&self, hash: KeyHash, record: KeyRecord) {
        self.inner.write().keys_by_hash.insert(hash, record);
    }

    /// Removes the key stored under `hash`, if any.
    pub fn remove_key(&self, hash: &KeyHash) {
        self.inner.write().keys_by_hash.remove(hash);
    }

    /// Replaces the granted permission set for a key.
    pub fn set_permissions(&self, key_id: KeyId, grants: Vec<String>) {
        self.inner.write().grants_by_key.insert(key_id, grants);
    }

    /// Applies a mutation to the record stored under `hash`.
    ///
    /// Used by tests to flip status or expiry on a seeded key without
    /// re-building the whole record. No-op when the hash is unknown.
    pub fn update_key<F>(&self, hash: &KeyHash, mutate: F)
    where
        F: FnOnce(&mut KeyRecord),
    {
        if let Some(record) = self.inner.write().keys_by_hash.get_mut(hash) {
            mutate(record);
        }
    }

    /// Returns the number of stored key records.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.inner.read().keys_by_hash.len()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn find_key_by_hash(&self, hash: &KeyHash) -> StorageResult<Option<KeyRecord>> {
        Ok(self.inner.read().keys_by_hash.get(hash).cloned())
    }

    async fn find_permissions_for_key(&self, key_id: &KeyId) -> StorageResult<Vec<String>> {
        Ok(self.inner.read().grants_by_key.get(key_id).cloned().unwrap_or_default())
    }
}
