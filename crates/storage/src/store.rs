//! Key store trait definition.
//!
//! This module defines [`KeyStore`], the contract between the verification
//! core and the relational store behind it. The hot path only ever reads:
//! key issuance, status transitions and permission grants happen through an
//! out-of-band control plane that this crate does not model.
//!
//! # Design Philosophy
//!
//! - **Read-only**: the two operations the hot path needs, nothing else.
//! - **Typed rows**: implementations decode into [`KeyRecord`] and flat
//!   permission lists at the boundary; SQL never leaks upward.
//! - **Absence is not an error**: a missing key is `Ok(None)`, so callers
//!   can negatively cache it. Errors mean the store could not answer.
//!
//! See [`MemoryKeyStore`](crate::MemoryKeyStore) for a reference
//! implementation and [`ReplicaKeyStore`](crate::ReplicaKeyStore) for the
//! replica-first production topology.

use async_trait::async_trait;

use crate::{
    error::StorageResult,
    types::{KeyHash, KeyId, KeyRecord},
};

/// Abstract read path over the key and permission tables.
///
/// Implementations are expected to be thread-safe (`Send + Sync`) and
/// support concurrent lookups.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Looks up a key record by the hash of its plaintext token.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))` if a key with that hash exists (in any status)
    /// - `Ok(None)` if no key has that hash
    /// - `Err(...)` if the store could not answer
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn find_key_by_hash(&self, hash: &KeyHash) -> StorageResult<Option<KeyRecord>>;

    /// Returns the flattened granted permission set for a key.
    ///
    /// The result is the union of the key's direct grants and the grants
    /// inherited through its roles, as a flat list of dotted identifiers.
    /// A key with no grants (or an unknown key id) yields an empty list.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn find_permissions_for_key(&self, key_id: &KeyId) -> StorageResult<Vec<String>>;
}
