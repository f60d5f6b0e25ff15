//! Cache error types.

use keygrid_storage::BoxError;
use thiserror::Error;

/// Errors surfaced by [`SwrCache`](crate::SwrCache) operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The loader failed and no stale value was available to serve.
    #[error("cache load failed: {source}")]
    Load {
        /// The loader's error, shared across single-flight followers.
        #[source]
        source: BoxError,
    },

    /// The caller gave up waiting on a single-flight load (the bounded
    /// wait expired). The underlying load keeps running; a later call may
    /// find its result cached. This is caller abandonment, not a store
    /// failure, and maps to the `Cancelled` wire kind.
    #[error("cache load abandoned after timeout")]
    LoadTimeout,

    /// The task driving this caller's own load died without publishing a
    /// result (loader panic). Followers re-elect; the leader surfaces this.
    #[error("cache load task failed before producing a result")]
    LoadTaskFailed,
}

impl CacheError {
    /// Wraps a loader error.
    #[must_use]
    pub fn load(source: BoxError) -> Self {
        Self::Load { source }
    }

    /// Returns the stable wire tag for this error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Load { .. } => "StoreUnavailable",
            Self::LoadTimeout => "Cancelled",
            Self::LoadTaskFailed => "Internal",
        }
    }
}
