//! Storage contract and domain types for the keygrid verification core.
//!
//! This crate provides the [`KeyStore`] trait and related types that every
//! other keygrid crate builds on. The hot path is strictly read-only: it
//! looks up key records by token hash and flattened permission sets by key
//! id, and interprets them against an injected [`Clock`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                keygrid-authz (verifier)                 │
//! ├─────────────────────────────────────────────────────────┤
//! │                 keygrid-cache (SWR)                     │
//! ├─────────────────────────────────────────────────────────┤
//! │                  keygrid-storage                        │
//! │                  KeyStore trait                         │
//! │     (find_key_by_hash, find_permissions_for_key)        │
//! ├────────────────┬────────────────────────────────────────┤
//! │ MemoryKeyStore │          ReplicaKeyStore               │
//! │   (testing)    │   (replica-first, primary fallback)    │
//! └────────────────┴────────────────────────────────────────┘
//! ```
//!
//! # Available Stores
//!
//! | Store | Use Case |
//! |-------|----------|
//! | [`MemoryKeyStore`] | Testing, development |
//! | [`ReplicaKeyStore`] | Production read topology over two SQL handles |
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with record builders and the
//!   failure-injecting [`FlakyKeyStore`](testutil::FlakyKeyStore). Enable this in
//!   `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod memory;
pub mod replica;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use memory::MemoryKeyStore;
pub use replica::{ReplicaKeyStore, ReplicaMetricsSnapshot, RetryConfig};
pub use store::KeyStore;
pub use types::{KeyHash, KeyId, KeyRecord, KeyStatus, WorkspaceId};
