//! Cluster coordination for keygrid: gossip membership, consistent-hash
//! ring and the binding between the two.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                keygrid-ratelimit                     │
//! │        (shard routing via FindInstance)              │
//! ├──────────────────────────────────────────────────────┤
//! │                    Cluster                           │
//! │   reconciler: membership events → ring mutations     │
//! ├──────────────────────┬───────────────────────────────┤
//! │     Membership       │           Ring                │
//! │ Gossip / Noop/Manual │  256 virtual tokens per node  │
//! └──────────────────────┴───────────────────────────────┘
//! ```
//!
//! The membership contract is the only coupling point: membership owns the
//! join/leave event streams; the cluster subscribes and never calls back
//! into membership except via `leave()` at shutdown.
//!
//! # Choosing a membership
//!
//! | Implementation | Use case |
//! |----------------|----------|
//! | [`GossipMembership`] | Multi-node deployments |
//! | [`NoopMembership`] | Single-node deployments, unit tests |
//! | [`ManualMembership`] | Static topologies, multi-node tests |

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Cluster binding and routing.
pub mod cluster;
/// Gossip configuration.
pub mod config;
/// Error types.
pub mod error;
/// Typed event topics.
pub mod events;
/// Networked gossip membership.
pub mod gossip;
/// Instance identity.
pub mod instance;
/// Membership contract and in-process implementations.
pub mod membership;
/// Generated wire types.
pub mod proto;
/// Consistent-hash ring.
pub mod ring;

// Re-export key types for convenience
pub use cluster::Cluster;
pub use config::{GossipConfig, GossipConfigBuilder};
pub use error::ClusterError;
pub use events::Topic;
pub use gossip::GossipMembership;
pub use instance::Instance;
pub use membership::{ManualMembership, Membership, NoopMembership};
pub use ring::{Node, Ring, TOKENS_PER_NODE};
