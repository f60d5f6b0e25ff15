//! Authorization error taxonomy.
//!
//! Every variant carries a stable string tag ([`AuthzError::kind`]) for
//! the wire: HTTP layers and SDKs match on the tag, never on Rust types.
//! Key-state rejections (`Disabled`, `Expired`, `UsageExhausted`) are
//! definitive and must not be cached as failures — the underlying record
//! is cached and re-evaluated per call instead.

use keygrid_cache::CacheError;
use keygrid_rbac::ParseError;
use keygrid_storage::BoxError;
use thiserror::Error;

/// Errors returned by the key verifier and permission service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// No key exists for the presented hash.
    #[error("key not found")]
    NotFound,

    /// The key exists but its status forbids use.
    #[error("key is disabled")]
    Disabled,

    /// The key's expiry has passed.
    #[error("key is expired")]
    Expired,

    /// The key's usage budget is spent.
    #[error("key usage is exhausted")]
    UsageExhausted,

    /// The backing store could not answer and no cached state was
    /// available.
    #[error("store unavailable")]
    StoreUnavailable {
        /// The underlying load failure.
        #[source]
        source: BoxError,
    },

    /// The caller abandoned the lookup before it completed (the bounded
    /// single-flight wait expired). The underlying load keeps running and
    /// may land in the cache for a later call; resources are released
    /// promptly.
    #[error("authorization lookup cancelled")]
    Cancelled,

    /// The permission query text did not parse.
    #[error("invalid permission query: {source}")]
    QueryParse {
        /// The parser's diagnosis.
        #[source]
        source: ParseError,
    },

    /// An invariant was violated.
    #[error("internal authorization error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl AuthzError {
    /// Returns the stable wire tag for this error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::Disabled => "Disabled",
            Self::Expired => "Expired",
            Self::UsageExhausted => "UsageExhausted",
            Self::StoreUnavailable { .. } => "StoreUnavailable",
            Self::Cancelled => "Cancelled",
            Self::QueryParse { .. } => "InvalidQuery",
            Self::Internal { .. } => "Internal",
        }
    }

    pub(crate) fn from_cache(error: CacheError) -> Self {
        match error {
            // The store answered with a failure.
            CacheError::Load { source } => Self::StoreUnavailable { source },
            // The caller gave up waiting; the load itself may still land.
            CacheError::LoadTimeout => Self::Cancelled,
            // The load task died without a result (loader panic).
            other => Self::Internal { message: other.to_string() },
        }
    }
}

impl From<ParseError> for AuthzError {
    fn from(source: ParseError) -> Self {
        Self::QueryParse { source }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_the_wire_taxonomy() {
        assert_eq!(AuthzError::NotFound.kind(), "NotFound");
        assert_eq!(AuthzError::Disabled.kind(), "Disabled");
        assert_eq!(AuthzError::Expired.kind(), "Expired");
        assert_eq!(AuthzError::UsageExhausted.kind(), "UsageExhausted");
        assert_eq!(AuthzError::Cancelled.kind(), "Cancelled");
    }

    #[test]
    fn cache_errors_map_by_failure_mode() {
        // Store failures propagate as unavailable.
        let source = std::sync::Arc::new(keygrid_storage::StorageError::unavailable("down"));
        let err = AuthzError::from_cache(CacheError::Load { source });
        assert_eq!(err.kind(), "StoreUnavailable");

        // An abandoned wait is the caller's cancellation, not the store's
        // fault.
        let err = AuthzError::from_cache(CacheError::LoadTimeout);
        assert!(matches!(err, AuthzError::Cancelled));
        assert_eq!(err.kind(), "Cancelled");

        // A dead load task is an invariant violation.
        let err = AuthzError::from_cache(CacheError::LoadTaskFailed);
        assert_eq!(err.kind(), "Internal");
    }
}
