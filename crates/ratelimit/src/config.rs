//! Rate-limit service configuration.

use std::time::Duration;

use keygrid_storage::ConfigError;

/// Default number of window-map partitions.
const DEFAULT_PARTITIONS: usize = 64;

/// Default gossip batch flush interval.
const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of gossip flushes between full snapshot frames.
const DEFAULT_SNAPSHOT_EVERY: u32 = 10;

/// Default capacity of the gossip increment queue.
const DEFAULT_QUEUE_CAPACITY: usize = 4_096;

/// Default window GC interval.
const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10);

/// Default timeout for a forwarded take RPC.
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(100);

/// Default deadline for draining gossip state at shutdown.
const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Configuration for [`RatelimitService`](crate::RatelimitService).
#[derive(Debug, Clone, Copy)]
pub struct RatelimitConfig {
    pub(crate) partitions: usize,
    pub(crate) gossip_interval: Duration,
    pub(crate) snapshot_every: u32,
    pub(crate) queue_capacity: usize,
    pub(crate) gc_interval: Duration,
    pub(crate) rpc_timeout: Duration,
    pub(crate) drain_deadline: Duration,
}

impl RatelimitConfig {
    /// Returns a builder seeded with the defaults.
    #[must_use]
    pub fn builder() -> RatelimitConfigBuilder {
        RatelimitConfigBuilder {
            partitions: DEFAULT_PARTITIONS,
            gossip_interval: DEFAULT_GOSSIP_INTERVAL,
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            gc_interval: DEFAULT_GC_INTERVAL,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            drain_deadline: DEFAULT_DRAIN_DEADLINE,
        }
    }
}

impl Default for RatelimitConfig {
    fn default() -> Self {
        match Self::builder().build() {
            Ok(config) => config,
            Err(_) => unreachable!("default RatelimitConfig must validate"),
        }
    }
}

/// Builder for [`RatelimitConfig`].
#[derive(Debug)]
pub struct RatelimitConfigBuilder {
    partitions: usize,
    gossip_interval: Duration,
    snapshot_every: u32,
    queue_capacity: usize,
    gc_interval: Duration,
    rpc_timeout: Duration,
    drain_deadline: Duration,
}

impl RatelimitConfigBuilder {
    /// Sets the number of window-map partitions.
    #[must_use]
    pub fn partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    /// Sets the gossip batch flush interval.
    #[must_use]
    pub fn gossip_interval(mut self, gossip_interval: Duration) -> Self {
        self.gossip_interval = gossip_interval;
        self
    }

    /// Sets how many gossip flushes pass between full snapshot frames.
    #[must_use]
    pub fn snapshot_every(mut self, snapshot_every: u32) -> Self {
        self.snapshot_every = snapshot_every;
        self
    }

    /// Sets the capacity of the gossip increment queue.
    #[must_use]
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets the window GC interval.
    #[must_use]
    pub fn gc_interval(mut self, gc_interval: Duration) -> Self {
        self.gc_interval = gc_interval;
        self
    }

    /// Sets the timeout for forwarded take RPCs.
    #[must_use]
    pub fn rpc_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }

    /// Sets the deadline for the shutdown gossip drain.
    #[must_use]
    pub fn drain_deadline(mut self, drain_deadline: Duration) -> Self {
        self.drain_deadline = drain_deadline;
        self
    }

    /// Builds the [`RatelimitConfig`], validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any duration is zero, or `partitions`,
    /// `snapshot_every` or `queue_capacity` is zero.
    pub fn build(self) -> Result<RatelimitConfig, ConfigError> {
        for (field, value) in [
            ("gossip_interval", self.gossip_interval),
            ("gc_interval", self.gc_interval),
            ("rpc_timeout", self.rpc_timeout),
            ("drain_deadline", self.drain_deadline),
        ] {
            if value.is_zero() {
                return Err(ConfigError::MustBePositive {
                    field,
                    value: format!("{}ms", value.as_millis()),
                });
            }
        }
        if self.partitions == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "partitions",
                min: "1".to_owned(),
                value: "0".to_owned(),
            });
        }
        if self.snapshot_every == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "snapshot_every",
                min: "1".to_owned(),
                value: "0".to_owned(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "queue_capacity",
                min: "1".to_owned(),
                value: "0".to_owned(),
            });
        }
        Ok(RatelimitConfig {
            partitions: self.partitions,
            gossip_interval: self.gossip_interval,
            snapshot_every: self.snapshot_every,
            queue_capacity: self.queue_capacity,
            gc_interval: self.gc_interval,
            rpc_timeout: self.rpc_timeout,
            drain_deadline: self.drain_deadline,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = RatelimitConfig::default();
        assert_eq!(config.partitions, DEFAULT_PARTITIONS);
        assert_eq!(config.rpc_timeout, DEFAULT_RPC_TIMEOUT);
    }

    #[test]
    fn rejects_zero_partitions() {
        let result = RatelimitConfig::builder().partitions(0).build();
        assert!(matches!(result, Err(ConfigError::BelowMinimum { field: "partitions", .. })));
    }

    #[test]
    fn rejects_zero_rpc_timeout() {
        let result = RatelimitConfig::builder().rpc_timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(ConfigError::MustBePositive { .. })));
    }
}
