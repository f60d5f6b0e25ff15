//! Clock capability for time-dependent decisions.
//!
//! Every component that compares against "now" — key expiry, cache
//! freshness at the verifier level, rate-limit window arithmetic — receives
//! an `Arc<dyn Clock>` instead of calling `Utc::now()` directly. Production
//! code injects [`SystemClock`]; tests inject [`ManualClock`] and step it
//! deterministically.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use chrono::{DateTime, TimeZone, Utc};

/// A source of wall-clock time.
///
/// Implementations must be cheap to call; the verifier consults the clock
/// on every request.
pub trait Clock: Send + Sync {
    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the current time as milliseconds since the Unix epoch.
    fn now_unix_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually-stepped clock for deterministic tests.
///
/// Starts at a fixed instant and only moves when told to. Cloning shares
/// the underlying time source, so a clock handed to a service under test
/// can be advanced from the test body.
///
/// # Examples
///
/// ```
/// use keygrid_storage::{Clock, ManualClock};
///
/// let clock = ManualClock::starting_at_ms(1_700_000_000_000);
/// clock.advance_ms(250);
/// assert_eq!(clock.now_unix_ms(), 1_700_000_000_250);
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock pinned at the given epoch milliseconds.
    #[must_use]
    pub fn starting_at_ms(epoch_ms: i64) -> Self {
        Self { now_ms: Arc::new(AtomicI64::new(epoch_ms)) }
    }

    /// Creates a clock pinned at the given instant.
    #[must_use]
    pub fn starting_at(instant: DateTime<Utc>) -> Self {
        Self::starting_at_ms(instant.timestamp_millis())
    }

    /// Advances the clock by `delta_ms` milliseconds.
    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Moves the clock to an absolute epoch-millisecond position.
    pub fn set_ms(&self, epoch_ms: i64) {
        self.now_ms.store(epoch_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.now_ms.load(Ordering::SeqCst);
        // timestamp_millis_opt is total for any i64 ms in the representable
        // range; a manual clock outside it is a test bug.
        match Utc.timestamp_millis_opt(ms) {
            chrono::LocalResult::Single(dt) => dt,
            _ => DateTime::<Utc>::MIN_UTC,
        }
    }

    fn now_unix_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
