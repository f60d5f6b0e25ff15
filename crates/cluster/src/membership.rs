//! Membership contract and the in-process implementations.
//!
//! The cluster layer depends only on this contract: a current member set
//! plus join/leave event streams. [`GossipMembership`](crate::gossip)
//! provides the networked implementation; [`NoopMembership`] covers
//! single-node deployments and tests; [`ManualMembership`] is a
//! programmatically-driven implementation for multi-node tests and static
//! topologies.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::{error::ClusterError, events::Topic, instance::Instance};

/// Peer discovery contract consumed by the cluster layer.
#[async_trait]
pub trait Membership: Send + Sync {
    /// Returns the currently-known live members, including self.
    fn members(&self) -> Vec<Instance>;

    /// Subscribes to instances joining the cluster.
    fn subscribe_join_events(&self) -> mpsc::UnboundedReceiver<Instance>;

    /// Subscribes to instances leaving the cluster (gracefully or via
    /// failure detection).
    fn subscribe_leave_events(&self) -> mpsc::UnboundedReceiver<Instance>;

    /// Announces departure and stops participating. Idempotent.
    async fn leave(&self) -> Result<(), ClusterError>;
}

/// Membership for a deployment of size one.
///
/// Knows only `self` and never emits events.
pub struct NoopMembership {
    self_instance: Instance,
    join_events: Topic<Instance>,
    leave_events: Topic<Instance>,
}

impl NoopMembership {
    /// Creates a single-node membership.
    #[must_use]
    pub fn new(self_instance: Instance) -> Self {
        Self { self_instance, join_events: Topic::new(), leave_events: Topic::new() }
    }
}

#[async_trait]
impl Membership for NoopMembership {
    fn members(&self) -> Vec<Instance> {
        vec![self.self_instance.clone()]
    }

    fn subscribe_join_events(&self) -> mpsc::UnboundedReceiver<Instance> {
        self.join_events.subscribe("noop.join")
    }

    fn subscribe_leave_events(&self) -> mpsc::UnboundedReceiver<Instance> {
        self.leave_events.subscribe("noop.leave")
    }

    async fn leave(&self) -> Result<(), ClusterError> {
        Ok(())
    }
}

/// Membership driven by explicit calls instead of a network protocol.
///
/// Useful for multi-node tests and deployments with a static peer list
/// managed by an external orchestrator.
pub struct ManualMembership {
    self_instance: Instance,
    peers: RwLock<Vec<Instance>>,
    join_events: Arc<Topic<Instance>>,
    leave_events: Arc<Topic<Instance>>,
}

impl ManualMembership {
    /// Creates a membership knowing `self` and an initial peer list.
    #[must_use]
    pub fn new(self_instance: Instance, peers: Vec<Instance>) -> Self {
        Self {
            self_instance,
            peers: RwLock::new(peers),
            join_events: Arc::new(Topic::new()),
            leave_events: Arc::new(Topic::new()),
        }
    }

    /// Adds a peer and publishes a join event. Re-adding a known peer is a
    /// no-op.
    pub fn add_peer(&self, instance: Instance) {
        {
            let mut peers = self.peers.write();
            if peers.iter().any(|peer| peer.instance_id == instance.instance_id)
                || instance.instance_id == self.self_instance.instance_id
            {
                return;
            }
            peers.push(instance.clone());
        }
        self.join_events.publish(instance);
    }

    /// Removes a peer and publishes a leave event. Unknown ids are a no-op.
    pub fn remove_peer(&self, instance_id: &str) {
        let removed = {
            let mut peers = self.peers.write();
            match peers.iter().position(|peer| peer.instance_id == instance_id) {
                Some(index) => Some(peers.remove(index)),
                None => None,
            }
        };
        if let Some(instance) = removed {
            self.leave_events.publish(instance);
        }
    }
}

#[async_trait]
impl Membership for ManualMembership {
    fn members(&self) -> Vec<Instance> {
        let mut members = vec![self.self_instance.clone()];
        members.extend(self.peers.read().iter().cloned());
        members
    }

    fn subscribe_join_events(&self) -> mpsc::UnboundedReceiver<Instance> {
        self.join_events.subscribe("manual.join")
    }

    fn subscribe_leave_events(&self) -> mpsc::UnboundedReceiver<Instance> {
        self.leave_events.subscribe("manual.leave")
    }

    async fn leave(&self) -> Result<(), ClusterError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn instance(id: &str) -> Instance {
        Instance::new(id, "127.0.0.1", 7070)
    }

    #[tokio::test]
    async fn noop_knows_only_self() {
        let membership = NoopMembership::new(instance("solo"));
        let members = membership.members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].instance_id, "solo");
        assert!(membership.leave().await.is_ok());
    }

    #[tokio::test]
    async fn manual_publishes_join_and_leave() {
        let membership = ManualMembership::new(instance("a"), Vec::new());
        let mut joins = membership.subscribe_join_events();
        let mut leaves = membership.subscribe_leave_events();

        membership.add_peer(instance("b"));
        assert_eq!(joins.recv().await.unwrap().instance_id, "b");
        assert_eq!(membership.members().len(), 2);

        membership.remove_peer("b");
        assert_eq!(leaves.recv().await.unwrap().instance_id, "b");
        assert_eq!(membership.members().len(), 1);
    }

    #[tokio::test]
    async fn manual_ignores_duplicate_and_self_joins() {
        let membership = ManualMembership::new(instance("a"), Vec::new());
        membership.add_peer(instance("b"));
        membership.add_peer(instance("b"));
        membership.add_peer(instance("a"));
        assert_eq!(membership.members().len(), 2);
    }
}
