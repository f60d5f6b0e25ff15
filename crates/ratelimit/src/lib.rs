//! Distributed sliding-window rate limiting for keygrid.
//!
//! Budgets are identified by `(namespace, identifier, duration, limit)`
//! tuples, fingerprinted and sharded across the cluster ring. The owning
//! node enforces against in-memory windows and replicates increments to
//! peers via gossip (CRDT max-merge on snapshots); non-owners forward a
//! unary RPC with a tight timeout and fail open locally when the owner is
//! unreachable.
//!
//! Counters are best-effort-consistent by design: two nodes may briefly
//! disagree about a window, but convergence is guaranteed by the max
//! semilattice merge, and a node never blocks request traffic on its own
//! replication machinery.
//!
//! # Composition
//!
//! ```no_run
//! use std::sync::Arc;
//! use keygrid_cluster::{Cluster, Instance, NoopMembership};
//! use keygrid_ratelimit::{RatelimitConfig, RatelimitIdentifier, RatelimitService};
//! use keygrid_storage::SystemClock;
//!
//! # async fn example() {
//! let me = Instance::new("node-1", "127.0.0.1", 7070);
//! let cluster = Arc::new(Cluster::new(me.clone(), Arc::new(NoopMembership::new(me))));
//! let limiter = RatelimitService::new(cluster, Arc::new(SystemClock), RatelimitConfig::default());
//!
//! let id = RatelimitIdentifier::new("api", "key_123", 1_000, 100);
//! let decision = limiter.take(&id, 1).await;
//! assert!(decision.success);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Service configuration.
pub mod config;
/// Error types.
pub mod error;
mod gossip;
/// Budget identity and fingerprinting.
pub mod identifier;
/// Metrics collection.
pub mod metrics;
/// Generated wire types.
pub mod proto;
/// Peer RPC server and client pool.
pub mod rpc;
/// The sharded service.
pub mod service;
/// Sliding windows and the partitioned store.
pub mod window;

// Re-export key types for convenience
pub use config::{RatelimitConfig, RatelimitConfigBuilder};
pub use error::RatelimitError;
pub use identifier::RatelimitIdentifier;
pub use metrics::{LatencyPercentiles, RatelimitMetrics, RatelimitMetricsSnapshot};
pub use rpc::{PeerServer, ServerHandle};
pub use service::RatelimitService;
pub use window::{RatelimitDecision, Window, WindowState, WindowStore};
