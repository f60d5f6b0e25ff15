//! Cluster error types.

use thiserror::Error;

/// Errors produced by the membership, ring and cluster layers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// A key lookup hit a ring with no registered nodes. Fatal for
    /// routing; rate limiting fails open on it.
    #[error("hash ring has no nodes")]
    RingEmpty,

    /// The gossip transport could not be set up or a peer exchange failed.
    #[error("membership transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The membership layer has already left the cluster.
    #[error("membership has left the cluster")]
    AlreadyLeft,
}

impl ClusterError {
    /// Creates a `Transport` error from a message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Returns the stable wire tag for this error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RingEmpty => "RingEmpty",
            Self::Transport { .. } => "PeerUnavailable",
            Self::AlreadyLeft => "Internal",
        }
    }
}
