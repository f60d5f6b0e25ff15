//! Cluster instance identity.

/// A single node of the cluster as seen by its peers.
///
/// `rpc_port` is the port of the node's *service* RPC surface (rate-limit
/// forwarding); the membership layer's own gossip port travels separately
/// in the wire digests.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Instance {
    /// Stable unique identifier of this node.
    pub instance_id: String,
    /// Host peers use to reach this node.
    pub host: String,
    /// Service RPC port.
    pub rpc_port: u16,
}

impl Instance {
    /// Creates an instance descriptor.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, host: impl Into<String>, rpc_port: u16) -> Self {
        Self { instance_id: instance_id.into(), host: host.into(), rpc_port }
    }

    /// Returns the `host:port` address of the service RPC surface.
    #[must_use]
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.host, self.rpc_port)
    }
}

impl std::fmt::Display for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.instance_id, self.rpc_addr())
    }
}
