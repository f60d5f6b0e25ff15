//! Cluster binding: membership events mirrored into the hash ring.
//!
//! [`Cluster`] is a thin layer that registers the local node on a
//! [`Ring`], runs a reconciler task consuming membership join/leave events
//! into ring mutations, and re-publishes those events on its own typed
//! topics so downstream services (the rate limiter, above all) can react
//! to topology changes.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ClusterError,
    events::Topic,
    instance::Instance,
    membership::Membership,
    ring::{Node, Ring},
};

struct ClusterInner {
    self_instance: Instance,
    membership: Arc<dyn Membership>,
    ring: Ring<Instance>,
    join_events: Topic<Instance>,
    leave_events: Topic<Instance>,
    size: AtomicU64,
    token: CancellationToken,
}

/// Consistent routing over the current membership.
///
/// Typically held behind an `Arc` and shared with every service that
/// routes by key.
pub struct Cluster {
    inner: Arc<ClusterInner>,
    reconciler: Mutex<Option<JoinHandle<()>>>,
}

impl Cluster {
    /// Creates a cluster bound to the given membership.
    ///
    /// Registers `self`, seeds the ring with the currently-known members
    /// and starts the background reconciler.
    #[must_use]
    pub fn new(self_instance: Instance, membership: Arc<dyn Membership>) -> Self {
        // Subscribe before seeding so no event can fall between the two.
        let mut joins = membership.subscribe_join_events();
        let mut leaves = membership.subscribe_leave_events();

        let ring = Ring::new();
        let mut initial = membership.members();
        if !initial.iter().any(|member| member.instance_id == self_instance.instance_id) {
            initial.push(self_instance.clone());
        }
        let size = initial.len() as u64;
        for member in initial {
            ring.add_node(Node { id: member.instance_id.clone(), tags: member });
        }

        let inner = Arc::new(ClusterInner {
            self_instance,
            membership,
            ring,
            join_events: Topic::new(),
            leave_events: Topic::new(),
            size: AtomicU64::new(size),
            token: CancellationToken::new(),
        });

        let reconciler_inner = Arc::clone(&inner);
        let reconciler = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = reconciler_inner.token.cancelled() => break,
                    joined = joins.recv() => {
                        let Some(instance) = joined else { break };
                        tracing::info!(instance = %instance, "instance joined");
                        reconciler_inner.ring.add_node(Node {
                            id: instance.instance_id.clone(),
                            tags: instance.clone(),
                        });
                        reconciler_inner.observe_size();
                        reconciler_inner.join_events.publish(instance);
                    },
                    left = leaves.recv() => {
                        let Some(instance) = left else { break };
                        tracing::info!(instance_id = %instance.instance_id, "instance left");
                        reconciler_inner.ring.remove_node(&instance.instance_id);
                        reconciler_inner.observe_size();
                        reconciler_inner.leave_events.publish(instance);
                    },
                }
            }
            tracing::debug!("cluster reconciler stopped");
        });

        Self { inner, reconciler: Mutex::new(Some(reconciler)) }
    }

    /// Returns the local node's descriptor.
    #[must_use]
    pub fn self_instance(&self) -> &Instance {
        &self.inner.self_instance
    }

    /// Returns the instance owning `key` on the ring.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::RingEmpty`] when no nodes are registered.
    pub fn find_instance(&self, key: &str) -> Result<Instance, ClusterError> {
        self.inner.ring.find_node(key).map(|node| node.tags)
    }

    /// Returns the last observed cluster size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.size.load(Ordering::Relaxed)
    }

    /// Returns the instances currently on the ring, including self.
    #[must_use]
    pub fn instances(&self) -> Vec<Instance> {
        self.inner.ring.nodes().into_iter().map(|node| node.tags).collect()
    }

    /// Subscribes to instances joining, as observed by this cluster.
    #[must_use]
    pub fn subscribe_join_events(&self) -> mpsc::UnboundedReceiver<Instance> {
        self.inner.join_events.subscribe("cluster.join")
    }

    /// Subscribes to instances leaving, as observed by this cluster.
    #[must_use]
    pub fn subscribe_leave_events(&self) -> mpsc::UnboundedReceiver<Instance> {
        self.inner.leave_events.subscribe("cluster.leave")
    }

    /// Leaves the membership and stops the reconciler.
    ///
    /// The leave happens first so peers stop routing shard traffic here
    /// before the local topology view freezes.
    pub async fn shutdown(&self) -> Result<(), ClusterError> {
        let result = self.inner.membership.leave().await;
        self.inner.token.cancel();
        let handle = self.reconciler.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        result
    }
}

impl ClusterInner {
    fn observe_size(&self) {
        let size = self.membership.members().len() as u64;
        self.size.store(size, Ordering::Relaxed);
    }
}
