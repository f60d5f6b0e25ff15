//! Verification and permission-check metrics.
//!
//! Outcome counters are `AtomicU64` with `Relaxed` ordering — independent
//! monotonic counters, snapshot consistency is approximate by design.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// The reason a verification resolved the way it did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The key verified successfully.
    Ok,
    /// No key for the presented hash.
    NotFound,
    /// Status was not active.
    Disabled,
    /// Expiry had passed.
    Expired,
    /// Usage budget spent.
    UsageExhausted,
    /// The store could not answer.
    StoreError,
}

/// Counters for verifier outcomes by reason.
#[derive(Clone, Default)]
pub struct VerifyMetrics {
    inner: Arc<VerifyMetricsInner>,
}

#[derive(Default)]
struct VerifyMetricsInner {
    ok: AtomicU64,
    not_found: AtomicU64,
    disabled: AtomicU64,
    expired: AtomicU64,
    usage_exhausted: AtomicU64,
    store_errors: AtomicU64,
}

/// Point-in-time snapshot of verifier outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyMetricsSnapshot {
    /// Successful verifications.
    pub ok: u64,
    /// Unknown key hashes.
    pub not_found: u64,
    /// Keys rejected for non-active status.
    pub disabled: u64,
    /// Keys rejected for expiry.
    pub expired: u64,
    /// Keys rejected for spent usage budget.
    pub usage_exhausted: u64,
    /// Verifications that failed on the store.
    pub store_errors: u64,
}

impl VerifyMetrics {
    /// Creates a new collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, outcome: VerifyOutcome) {
        let counter = match outcome {
            VerifyOutcome::Ok => &self.inner.ok,
            VerifyOutcome::NotFound => &self.inner.not_found,
            VerifyOutcome::Disabled => &self.inner.disabled,
            VerifyOutcome::Expired => &self.inner.expired,
            VerifyOutcome::UsageExhausted => &self.inner.usage_exhausted,
            VerifyOutcome::StoreError => &self.inner.store_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of current counters.
    #[must_use = "returns a point-in-time snapshot without side effects"]
    pub fn snapshot(&self) -> VerifyMetricsSnapshot {
        VerifyMetricsSnapshot {
            ok: self.inner.ok.load(Ordering::Relaxed),
            not_found: self.inner.not_found.load(Ordering::Relaxed),
            disabled: self.inner.disabled.load(Ordering::Relaxed),
            expired: self.inner.expired.load(Ordering::Relaxed),
            usage_exhausted: self.inner.usage_exhausted.load(Ordering::Relaxed),
            store_errors: self.inner.store_errors.load(Ordering::Relaxed),
        }
    }
}

/// Counters for permission checks.
#[derive(Clone, Default)]
pub struct CheckMetrics {
    inner: Arc<CheckMetricsInner>,
}

#[derive(Default)]
struct CheckMetricsInner {
    allowed: AtomicU64,
    denied: AtomicU64,
    load_errors: AtomicU64,
}

/// Point-in-time snapshot of permission-check counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckMetricsSnapshot {
    /// Checks that evaluated valid.
    pub allowed: u64,
    /// Checks that evaluated invalid.
    pub denied: u64,
    /// Checks that failed to load the granted set.
    pub load_errors: u64,
}

impl CheckMetrics {
    /// Creates a new collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_check(&self, valid: bool) {
        if valid {
            self.inner.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_load_error(&self) {
        self.inner.load_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of current counters.
    #[must_use = "returns a point-in-time snapshot without side effects"]
    pub fn snapshot(&self) -> CheckMetricsSnapshot {
        CheckMetricsSnapshot {
            allowed: self.inner.allowed.load(Ordering::Relaxed),
            denied: self.inner.denied.load(Ordering::Relaxed),
            load_errors: self.inner.load_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn verify_outcomes_land_in_their_counter() {
        let metrics = VerifyMetrics::new();
        metrics.record(VerifyOutcome::Ok);
        metrics.record(VerifyOutcome::Ok);
        metrics.record(VerifyOutcome::Expired);

        let snap = metrics.snapshot();
        assert_eq!(snap.ok, 2);
        assert_eq!(snap.expired, 1);
        assert_eq!(snap.not_found, 0);
    }

    #[test]
    fn check_counters_split_by_validity() {
        let metrics = CheckMetrics::new();
        metrics.record_check(true);
        metrics.record_check(false);
        metrics.record_load_error();

        let snap = metrics.snapshot();
        assert_eq!(snap.allowed, 1);
        assert_eq!(snap.denied, 1);
        assert_eq!(snap.load_errors, 1);
    }
}
