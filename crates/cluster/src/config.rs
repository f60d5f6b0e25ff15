//! Gossip membership configuration.

use std::{net::SocketAddr, time::Duration};

use keygrid_storage::ConfigError;

/// Default interval between gossip probes.
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Default time a suspect member has to refute before it is declared gone.
const DEFAULT_SUSPICION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default retention for left-member tombstones.
const DEFAULT_TOMBSTONE_RETENTION: Duration = Duration::from_secs(60);

/// Default timeout for a single peer sync RPC.
const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for [`GossipMembership`](crate::gossip::GossipMembership).
///
/// # Validation
///
/// - all durations must be positive
/// - `suspicion_timeout` must be >= `probe_interval`
#[derive(Debug, Clone)]
pub struct GossipConfig {
    pub(crate) instance_id: String,
    pub(crate) advertise_host: String,
    pub(crate) rpc_port: u16,
    pub(crate) gossip_bind: SocketAddr,
    pub(crate) seeds: Vec<String>,
    pub(crate) probe_interval: Duration,
    pub(crate) suspicion_timeout: Duration,
    pub(crate) tombstone_retention: Duration,
    pub(crate) sync_timeout: Duration,
}

impl GossipConfig {
    /// Returns a builder for the given identity.
    ///
    /// `rpc_port` is the *service* RPC port advertised to peers; the gossip
    /// listener binds `gossip_bind` (port 0 picks an ephemeral port).
    #[must_use]
    pub fn builder(
        instance_id: impl Into<String>,
        advertise_host: impl Into<String>,
        rpc_port: u16,
    ) -> GossipConfigBuilder {
        GossipConfigBuilder {
            instance_id: instance_id.into(),
            advertise_host: advertise_host.into(),
            rpc_port,
            gossip_bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            seeds: Vec::new(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
            suspicion_timeout: DEFAULT_SUSPICION_TIMEOUT,
            tombstone_retention: DEFAULT_TOMBSTONE_RETENTION,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }
}

/// Builder for [`GossipConfig`].
#[derive(Debug)]
pub struct GossipConfigBuilder {
    instance_id: String,
    advertise_host: String,
    rpc_port: u16,
    gossip_bind: SocketAddr,
    seeds: Vec<String>,
    probe_interval: Duration,
    suspicion_timeout: Duration,
    tombstone_retention: Duration,
    sync_timeout: Duration,
}

impl GossipConfigBuilder {
    /// Sets the local gossip listener address. Port 0 binds an ephemeral
    /// port (the bound address is discoverable after start).
    #[must_use]
    pub fn gossip_bind(mut self, gossip_bind: SocketAddr) -> Self {
        self.gossip_bind = gossip_bind;
        self
    }

    /// Sets the seed gossip addresses synced at startup.
    #[must_use]
    pub fn seeds(mut self, seeds: Vec<String>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Sets the interval between probes of a random peer.
    #[must_use]
    pub fn probe_interval(mut self, probe_interval: Duration) -> Self {
        self.probe_interval = probe_interval;
        self
    }

    /// Sets how long a suspect member may stay silent before it is treated
    /// as gone and a leave event fires.
    #[must_use]
    pub fn suspicion_timeout(mut self, suspicion_timeout: Duration) -> Self {
        self.suspicion_timeout = suspicion_timeout;
        self
    }

    /// Sets how long left-member tombstones are retained to block stale
    /// re-announcements.
    #[must_use]
    pub fn tombstone_retention(mut self, tombstone_retention: Duration) -> Self {
        self.tombstone_retention = tombstone_retention;
        self
    }

    /// Sets the timeout for a single peer sync RPC.
    #[must_use]
    pub fn sync_timeout(mut self, sync_timeout: Duration) -> Self {
        self.sync_timeout = sync_timeout;
        self
    }

    /// Builds the [`GossipConfig`], validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any duration is zero or
    /// `suspicion_timeout < probe_interval`.
    pub fn build(self) -> Result<GossipConfig, ConfigError> {
        for (field, value) in [
            ("probe_interval", self.probe_interval),
            ("suspicion_timeout", self.suspicion_timeout),
            ("tombstone_retention", self.tombstone_retention),
            ("sync_timeout", self.sync_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::MustBePositive {
                    field,
                    value: format!("{}ms", value.as_millis()),
                });
            }
        }
        if self.suspicion_timeout < self.probe_interval {
            return Err(ConfigError::InvalidRelation {
                field_a: "probe_interval",
                value_a: format!("{}ms", self.probe_interval.as_millis()),
                field_b: "suspicion_timeout",
                value_b: format!("{}ms", self.suspicion_timeout.as_millis()),
            });
        }
        Ok(GossipConfig {
            instance_id: self.instance_id,
            advertise_host: self.advertise_host,
            rpc_port: self.rpc_port,
            gossip_bind: self.gossip_bind,
            seeds: self.seeds,
            probe_interval: self.probe_interval,
            suspicion_timeout: self.suspicion_timeout,
            tombstone_retention: self.tombstone_retention,
            sync_timeout: self.sync_timeout,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = GossipConfig::builder("node-1", "127.0.0.1", 7070).build().unwrap();
        assert_eq!(config.probe_interval, DEFAULT_PROBE_INTERVAL);
        assert_eq!(config.suspicion_timeout, DEFAULT_SUSPICION_TIMEOUT);
    }

    #[test]
    fn rejects_zero_probe_interval() {
        let result = GossipConfig::builder("node-1", "127.0.0.1", 7070)
            .probe_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(ConfigError::MustBePositive { .. })));
    }

    #[test]
    fn rejects_suspicion_shorter_than_probe() {
        let result = GossipConfig::builder("node-1", "127.0.0.1", 7070)
            .probe_interval(Duration::from_secs(2))
            .suspicion_timeout(Duration::from_secs(1))
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidRelation { .. })));
    }
}
