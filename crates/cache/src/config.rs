//! Configuration for the SWR cache.

use std::time::Duration;

use keygrid_storage::ConfigError;

/// Default freshness window for positive entries.
const DEFAULT_FRESH_TTL: Duration = Duration::from_secs(60);

/// Default total lifetime for positive entries (fresh + stale window).
const DEFAULT_STALE_TTL: Duration = Duration::from_secs(300);

/// Default lifetime for negative entries.
const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(30);

/// Default maximum number of cache entries.
const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Default bound on how long a caller waits for a single-flight load.
const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`SwrCache`](crate::SwrCache).
///
/// # Validation
///
/// - all durations must be positive
/// - `fresh_ttl` must be <= `stale_ttl`
/// - `max_entries` must be >= 1
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use keygrid_cache::SwrConfig;
///
/// let config = SwrConfig::builder()
///     .fresh_ttl(Duration::from_secs(30))
///     .stale_ttl(Duration::from_secs(120))
///     .negative_ttl(Duration::from_secs(15))
///     .build()
///     .expect("valid config");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SwrConfig {
    pub(crate) fresh_ttl: Duration,
    pub(crate) stale_ttl: Duration,
    pub(crate) negative_ttl: Duration,
    pub(crate) max_entries: u64,
    pub(crate) load_timeout: Duration,
}

impl SwrConfig {
    /// Returns a builder seeded with the defaults.
    #[must_use]
    pub fn builder() -> SwrConfigBuilder {
        SwrConfigBuilder {
            fresh_ttl: DEFAULT_FRESH_TTL,
            stale_ttl: DEFAULT_STALE_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    /// Returns the freshness window for positive entries.
    #[must_use]
    pub fn fresh_ttl(&self) -> Duration {
        self.fresh_ttl
    }

    /// Returns the total lifetime for positive entries.
    #[must_use]
    pub fn stale_ttl(&self) -> Duration {
        self.stale_ttl
    }

    /// Returns the lifetime for negative entries.
    #[must_use]
    pub fn negative_ttl(&self) -> Duration {
        self.negative_ttl
    }

    /// Returns the maximum number of entries.
    #[must_use]
    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }
}

impl Default for SwrConfig {
    fn default() -> Self {
        // The builder defaults always validate.
        match Self::builder().build() {
            Ok(config) => config,
            Err(_) => unreachable!("default SwrConfig must validate"),
        }
    }
}

/// Builder for [`SwrConfig`].
#[derive(Debug)]
pub struct SwrConfigBuilder {
    fresh_ttl: Duration,
    stale_ttl: Duration,
    negative_ttl: Duration,
    max_entries: u64,
    load_timeout: Duration,
}

impl SwrConfigBuilder {
    /// Sets how long positive entries serve without revalidation.
    #[must_use]
    pub fn fresh_ttl(mut self, fresh_ttl: Duration) -> Self {
        self.fresh_ttl = fresh_ttl;
        self
    }

    /// Sets the total lifetime of positive entries. The span between
    /// `fresh_ttl` and `stale_ttl` is the stale-while-revalidate window.
    #[must_use]
    pub fn stale_ttl(mut self, stale_ttl: Duration) -> Self {
        self.stale_ttl = stale_ttl;
        self
    }

    /// Sets the lifetime of negative ("does not exist") entries.
    #[must_use]
    pub fn negative_ttl(mut self, negative_ttl: Duration) -> Self {
        self.negative_ttl = negative_ttl;
        self
    }

    /// Sets the maximum number of entries before recency-based eviction.
    #[must_use]
    pub fn max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets how long a caller waits on a single-flight load before giving
    /// up with a timeout error.
    #[must_use]
    pub fn load_timeout(mut self, load_timeout: Duration) -> Self {
        self.load_timeout = load_timeout;
        self
    }

    /// Builds the [`SwrConfig`], validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any duration is zero, `max_entries` is 0,
    /// or `fresh_ttl > stale_ttl`.
    pub fn build(self) -> Result<SwrConfig, ConfigError> {
        for (field, value) in [
            ("fresh_ttl", self.fresh_ttl),
            ("stale_ttl", self.stale_ttl),
            ("negative_ttl", self.negative_ttl),
            ("load_timeout", self.load_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::MustBePositive {
                    field,
                    value: format!("{}ms", value.as_millis()),
                });
            }
        }
        if self.max_entries == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_entries",
                min: "1".to_owned(),
                value: "0".to_owned(),
            });
        }
        if self.fresh_ttl > self.stale_ttl {
            return Err(ConfigError::InvalidRelation {
                field_a: "fresh_ttl",
                value_a: format!("{}ms", self.fresh_ttl.as_millis()),
                field_b: "stale_ttl",
                value_b: format!("{}ms", self.stale_ttl.as_millis()),
            });
        }
        Ok(SwrConfig {
            fresh_ttl: self.fresh_ttl,
            stale_ttl: self.stale_ttl,
            negative_ttl: self.negative_ttl,
            max_entries: self.max_entries,
            load_timeout: self.load_timeout,
        })
    }
}
