//! Cache entry state and caching decisions.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use keygrid_storage::BoxError;

/// Outcome of a loader invocation.
///
/// `Ok(None)` means the backing store answered definitively that the key
/// does not exist; `Err` means the store could not answer.
pub type LoadOutcome<V> = Result<Option<V>, BoxError>;

/// Caching policy for a loader outcome, chosen by the caller's `decide`
/// callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Cache the loaded value under the positive fresh/stale TTLs.
    WriteValue,
    /// Negatively cache "definitely does not exist" under the (short)
    /// negative TTL, preventing stampedes on missing keys.
    WriteNull,
    /// Cache nothing; any existing entry is left untouched.
    Noop,
}

/// A single cached entry.
///
/// Invariant: `fresh_until <= stale_until`. Between the two instants the
/// entry is *stale*: it is still served, but a background refresh is
/// scheduled. Past `stale_until` the entry is dead and is evicted lazily
/// on access or by the store's expiry policy.
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// The cached value; `None` is a negative entry ("does not exist").
    pub(crate) value: Option<V>,
    /// Entry serves without revalidation until this instant.
    pub(crate) fresh_until: Instant,
    /// Entry is evicted after this instant.
    pub(crate) stale_until: Instant,
    /// Set while a background refresh for this key is in flight, so
    /// concurrent stale hits schedule at most one refresh.
    pub(crate) refreshing: AtomicBool,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: Option<V>, fresh_until: Instant, stale_until: Instant) -> Self {
        debug_assert!(fresh_until <= stale_until);
        Self { value, fresh_until, stale_until, refreshing: AtomicBool::new(false) }
    }

    /// Returns `true` while the entry may be served without revalidation.
    pub(crate) fn is_fresh(&self, now: Instant) -> bool {
        now < self.fresh_until
    }

    /// Returns `true` once the entry must not be served at all.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now >= self.stale_until
    }

    /// Attempts to claim the refresh slot. Returns `true` for exactly one
    /// caller until the refresh completes.
    pub(crate) fn claim_refresh(&self) -> bool {
        !self.refreshing.swap(true, Ordering::AcqRel)
    }

    /// Releases the refresh slot.
    pub(crate) fn finish_refresh(&self) {
        self.refreshing.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn freshness_windows() {
        let now = Instant::now();
        let entry =
            CacheEntry::new(Some(1u32), now + Duration::from_secs(1), now + Duration::from_secs(2));

        assert!(entry.is_fresh(now));
        assert!(!entry.is_expired(now));

        let stale_point = now + Duration::from_millis(1500);
        assert!(!entry.is_fresh(stale_point));
        assert!(!entry.is_expired(stale_point));

        let dead_point = now + Duration::from_secs(3);
        assert!(entry.is_expired(dead_point));
    }

    #[test]
    fn refresh_claim_is_exclusive() {
        let now = Instant::now();
        let entry = CacheEntry::new(Some(1u32), now, now);
        assert!(entry.claim_refresh());
        assert!(!entry.claim_refresh());
        entry.finish_refresh();
        assert!(entry.claim_refresh());
    }
}
