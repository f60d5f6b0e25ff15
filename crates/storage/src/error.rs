//! Storage error types and result alias.
//!
//! All key stores map their internal failures to [`StorageError`]. The
//! variants carry a stable string tag (see [`StorageError::kind`]) so the
//! taxonomy can cross process boundaries without leaking Rust types.
//!
//! # Transience
//!
//! [`StorageError::is_transient`] drives the retry and fallback policy in
//! [`ReplicaKeyStore`](crate::ReplicaKeyStore) and the stale-serving policy
//! in the cache layer: `Unavailable` and `Timeout` are transient,
//! everything else is definitive.
//!
//! # Example
//!
//! ```
//! use keygrid_storage::{StorageError, StorageResult};
//!
//! fn lookup() -> StorageResult<Vec<u8>> {
//!     Err(StorageError::unavailable("replica connection refused"))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A cloneable boxed error for source chain tracking.
///
/// `Arc` rather than `Box` so that a single load failure can be observed by
/// every follower of a single-flight load without re-running the loader.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error returned when a configuration value fails validation.
///
/// Each variant names the field that was invalid and the constraint it
/// violated, providing actionable feedback for operators constructing
/// configs.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A field that must be positive was set to zero or a zero-length duration.
    #[error("invalid {field}: must be positive (got {value})")]
    MustBePositive {
        /// The name of the configuration field.
        field: &'static str,
        /// A human-readable representation of the invalid value.
        value: String,
    },

    /// A minimum-bound constraint was violated.
    #[error("invalid {field}: must be >= {min} (got {value})")]
    BelowMinimum {
        /// The name of the configuration field.
        field: &'static str,
        /// The minimum allowed value (human-readable).
        min: String,
        /// The actual value provided (human-readable).
        value: String,
    },

    /// A relational constraint between two fields was violated.
    #[error("invalid config: {field_a} ({value_a}) must be <= {field_b} ({value_b})")]
    InvalidRelation {
        /// The field that should be the smaller value.
        field_a: &'static str,
        /// The actual value of field_a (human-readable).
        value_a: String,
        /// The field that should be the larger value.
        field_b: &'static str,
        /// The actual value of field_b (human-readable).
        value_b: String,
    },
}

/// Errors that can occur during key store operations.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]` — downstream match expressions
/// must include a wildcard arm.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The store could not be reached (connection refused, DNS failure,
    /// replica down). Transient; eligible for retry and primary fallback.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// The underlying error, when one exists.
        #[source]
        source: Option<BoxError>,
    },

    /// The operation exceeded its time budget. Transient.
    #[error("store operation timed out")]
    Timeout,

    /// The store answered but the row content could not be decoded.
    #[error("failed to decode stored row: {message}")]
    Corrupt {
        /// Description of the decode failure.
        message: String,
    },

    /// An invariant was violated inside the store implementation.
    #[error("internal storage error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl StorageError {
    /// Creates an `Unavailable` error from a message.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    /// Creates an `Unavailable` error wrapping a source error.
    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a `Corrupt` error from a message.
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt { message: message.into() }
    }

    /// Creates an `Internal` error from a message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Returns `true` when the error indicates a condition that may clear
    /// on retry (connectivity, timeout). Definitive answers — decode
    /// failures, invariant violations — are not transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout)
    }

    /// Returns the stable wire tag for this error kind.
    ///
    /// These tags are part of the external error taxonomy and must never
    /// change for an existing variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } | Self::Timeout => "StoreUnavailable",
            Self::Corrupt { .. } | Self::Internal { .. } => "Internal",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn transience_classification() {
        assert!(StorageError::unavailable("down").is_transient());
        assert!(StorageError::timeout().is_transient());
        assert!(!StorageError::corrupt("bad row").is_transient());
        assert!(!StorageError::internal("oops").is_transient());
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(StorageError::unavailable("x").kind(), "StoreUnavailable");
        assert_eq!(StorageError::timeout().kind(), "StoreUnavailable");
        assert_eq!(StorageError::internal("x").kind(), "Internal");
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StorageError::unavailable_with_source("replica down", io);
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("refused"));
    }

    #[test]
    fn errors_are_cloneable() {
        let err = StorageError::unavailable("down");
        let clone = err.clone();
        assert_eq!(err.kind(), clone.kind());
    }
}
