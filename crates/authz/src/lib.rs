//! # Keygrid Authorization
//!
//! The request-path authorization surface of keygrid: key verification and
//! permission checks.
//!
//! This crate provides:
//! - **Key verification**: presented hash → `{workspace_id, key_id}` with
//!   status, expiry and usage checks against an injected clock
//! - **Permission checks**: cached granted sets evaluated against
//!   permission queries (see [`keygrid_rbac`])
//!
//! Both services read through the SWR cache layer ([`keygrid_cache`]):
//! verification negatively caches unknown hashes, permission checks retain
//! stale grants through store outages.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use keygrid_authz::KeyVerifier;
//! use keygrid_storage::{KeyHash, MemoryKeyStore, SystemClock, testutil::active_key};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemoryKeyStore::new();
//! store.insert_key(KeyHash::from("h1"), active_key("k1", "ws_1"));
//!
//! let verifier = KeyVerifier::new(Arc::new(store), Arc::new(SystemClock));
//! let verified = verifier.verify(&KeyHash::from("h1")).await.unwrap();
//! assert_eq!(verified.authorized_workspace_id.as_str(), "ws_1");
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Error taxonomy with stable wire tags.
pub mod error;
/// Outcome and check metrics.
pub mod metrics;
/// Permission checking.
pub mod permissions;
/// Key verification.
pub mod verifier;

// Re-export key types for convenience
pub use error::AuthzError;
pub use metrics::{CheckMetrics, CheckMetricsSnapshot, VerifyMetrics, VerifyMetricsSnapshot};
pub use permissions::PermissionService;
pub use verifier::{KeyVerifier, VerifiedKey};
