//! Request-path cache layer for the keygrid verification core.
//!
//! This crate provides [`SwrCache`], a typed keyed cache with TTL,
//! stale-while-revalidate and single-flight refresh. It shields the
//! relational store from the per-request read load of key verification and
//! permission checks.
//!
//! # Semantics
//!
//! | Entry state | Behavior |
//! |-------------|----------|
//! | Fresh | Value returned immediately |
//! | Stale | Value returned immediately, one async refresh scheduled |
//! | Absent | Caller blocks on the loader; `decide` picks the caching policy |
//!
//! Concurrent loads for the same key collapse into a single loader
//! invocation ([`CacheDecision`] docs cover the policy callback). Negative
//! results can be cached with a short TTL to stop stampedes on keys that do
//! not exist.
//!
//! # Example
//!
//! ```
//! use keygrid_cache::{CacheDecision, SwrCache, SwrConfig};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let cache: SwrCache<String, u64> = SwrCache::new(SwrConfig::default());
//! let value = cache
//!     .swr(
//!         "answer".to_owned(),
//!         || async { Ok(Some(42)) },
//!         |outcome| match outcome {
//!             Ok(Some(_)) => CacheDecision::WriteValue,
//!             Ok(None) => CacheDecision::WriteNull,
//!             Err(_) => CacheDecision::Noop,
//!         },
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(value, Some(42));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod entry;
pub mod error;
pub mod metrics;
pub mod swr;

pub use config::{SwrConfig, SwrConfigBuilder};
pub use entry::{CacheDecision, LoadOutcome};
pub use error::CacheError;
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use swr::{SwrCache, SweeperHandle};
