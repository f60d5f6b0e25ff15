//! Rate-limit error types.
//!
//! Note that [`take`](crate::RatelimitService::take) itself is infallible:
//! routing and peer failures fail open by design and surface only through
//! metrics and logs. These errors cover the service's own lifecycle (bind,
//! serve, shutdown cancellation) and the wire layer.

use thiserror::Error;

/// Errors surfaced by the rate-limit service lifecycle and transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RatelimitError {
    /// The ring had no nodes for a routing decision.
    #[error("hash ring has no nodes")]
    RingEmpty,

    /// A peer could not be reached or answered with an error.
    #[error("peer unavailable: {message}")]
    PeerUnavailable {
        /// Description of the failure.
        message: String,
    },

    /// The local RPC listener could not be set up.
    #[error("ratelimit transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The operation was interrupted by cancellation — shutdown caught an
    /// in-flight forward. In-flight I/O is abandoned and resources are
    /// released promptly.
    #[error("ratelimit operation cancelled")]
    Cancelled,

    /// An invariant was violated.
    #[error("internal ratelimit error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl RatelimitError {
    /// Creates a `PeerUnavailable` error from a message.
    #[must_use]
    pub fn peer_unavailable(message: impl Into<String>) -> Self {
        Self::PeerUnavailable { message: message.into() }
    }

    /// Creates a `Transport` error from a message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Creates an `Internal` error from a message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Returns the stable wire tag for this error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RingEmpty => "RingEmpty",
            Self::PeerUnavailable { .. } => "PeerUnavailable",
            Self::Transport { .. } => "PeerUnavailable",
            Self::Cancelled => "Cancelled",
            Self::Internal { .. } => "Internal",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(RatelimitError::RingEmpty.kind(), "RingEmpty");
        assert_eq!(RatelimitError::peer_unavailable("down").kind(), "PeerUnavailable");
        assert_eq!(RatelimitError::transport("bind failed").kind(), "PeerUnavailable");
        assert_eq!(RatelimitError::Cancelled.kind(), "Cancelled");
        assert_eq!(RatelimitError::internal("oops").kind(), "Internal");
    }
}
