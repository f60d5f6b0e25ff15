//! The cluster-sharded rate-limit service.
//!
//! [`RatelimitService::take`] routes each budget to its owning node via the
//! cluster ring: the owner enforces against its authoritative windows and
//! replicates increments to peers over gossip; non-owners forward a unary
//! RPC with a tight timeout.
//!
//! # Fail-open
//!
//! `take` is infallible by design. When the ring is empty or the owning
//! peer cannot be reached, the request is served against local window
//! state — availability wins over strict enforcement, and the divergence
//! heals through gossip. Failures surface only as warnings and metrics.

use std::{sync::Arc, time::Instant};

use keygrid_cluster::{Cluster, Instance};
use keygrid_storage::Clock;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::RatelimitConfig,
    error::RatelimitError,
    gossip,
    identifier::RatelimitIdentifier,
    metrics::RatelimitMetrics,
    proto::v1::TakeRequest,
    rpc::PeerPool,
    window::{RatelimitDecision, WindowStore},
};

/// A queued counter increment awaiting gossip replication.
pub(crate) struct IncrementEvent {
    pub(crate) fingerprint: u64,
    pub(crate) sequence: i64,
    pub(crate) delta: i64,
    pub(crate) duration_ms: i64,
}

pub(crate) struct ServiceInner {
    pub(crate) cluster: Arc<Cluster>,
    pub(crate) windows: WindowStore,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: RatelimitConfig,
    pub(crate) metrics: RatelimitMetrics,
    pub(crate) peers: PeerPool,
    pub(crate) increments_tx: mpsc::Sender<IncrementEvent>,
    pub(crate) token: CancellationToken,
}

impl ServiceInner {
    /// Enforces against local windows and queues the increment for
    /// replication.
    ///
    /// Increments are never dropped: when the queue is full the caller
    /// waits for the batcher to drain (backpressure), except during
    /// shutdown when the channel is closed.
    pub(crate) async fn local_take(
        &self,
        fingerprint: u64,
        id: &RatelimitIdentifier,
        cost: i64,
    ) -> RatelimitDecision {
        let now_ms = self.clock.now_unix_ms();
        let decision = self.windows.take(fingerprint, id, cost, now_ms);
        if decision.success {
            let event = IncrementEvent {
                fingerprint,
                sequence: now_ms.div_euclid(id.duration_ms.max(1)),
                delta: cost,
                duration_ms: id.duration_ms,
            };
            if let Err(rejected) = self.increments_tx.try_send(event) {
                match rejected {
                    mpsc::error::TrySendError::Full(event) => {
                        let _ = self.increments_tx.send(event).await;
                    },
                    mpsc::error::TrySendError::Closed(_) => {},
                }
            }
        }
        decision
    }
}

/// Distributed sliding-window rate limiter.
pub struct RatelimitService {
    inner: Arc<ServiceInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RatelimitService {
    /// Creates the service and starts its background tasks: the gossip
    /// batcher, the window GC and the topology watcher that drops peer
    /// connections on leave events.
    #[must_use]
    pub fn new(cluster: Arc<Cluster>, clock: Arc<dyn Clock>, config: RatelimitConfig) -> Self {
        let (increments_tx, increments_rx) = mpsc::channel(config.queue_capacity);
        let inner = Arc::new(ServiceInner {
            windows: WindowStore::new(config.partitions),
            clock,
            metrics: RatelimitMetrics::new(),
            peers: PeerPool::new(),
            increments_tx,
            token: CancellationToken::new(),
            config,
            cluster,
        });

        let gossip_task = tokio::spawn(gossip::run(Arc::clone(&inner), increments_rx));

        let gc_inner = Arc::clone(&inner);
        let gc_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gc_inner.config.gc_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = gc_inner.token.cancelled() => break,
                    _ = ticker.tick() => {
                        gc_inner.windows.gc(gc_inner.clock.now_unix_ms());
                    },
                }
            }
            tracing::debug!("ratelimit gc stopped");
        });

        let topology_inner = Arc::clone(&inner);
        let mut leaves = topology_inner.cluster.subscribe_leave_events();
        let topology_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = topology_inner.token.cancelled() => break,
                    left = leaves.recv() => {
                        let Some(instance) = left else { break };
                        // Windows are not migrated; they age out. Dropping
                        // the cached channel is the only reshard work.
                        topology_inner.peers.remove(&instance.instance_id);
                    },
                }
            }
            tracing::debug!("ratelimit topology watcher stopped");
        });

        Self { inner, tasks: Mutex::new(vec![gossip_task, gc_task, topology_task]) }
    }

    /// Consumes `cost` from the identifier's sliding budget.
    ///
    /// Routing: the fingerprint's ring owner enforces. Non-owners forward;
    /// on forward failure (or an empty ring) the request is served locally
    /// and the divergence heals through gossip.
    pub async fn take(&self, id: &RatelimitIdentifier, cost: i64) -> RatelimitDecision {
        let fingerprint = id.fingerprint();

        let decision = match self.inner.cluster.find_instance(&id.routing_key()) {
            Err(_) => {
                self.inner.metrics.record_ring_empty();
                self.inner.metrics.record_failed_open();
                tracing::warn!(
                    namespace = %id.namespace,
                    "ring empty; serving rate limit locally (fail open)"
                );
                self.inner.local_take(fingerprint, id, cost).await
            },
            Ok(owner) if owner.instance_id == self.inner.cluster.self_instance().instance_id => {
                self.inner.local_take(fingerprint, id, cost).await
            },
            Ok(owner) => match self.forward(&owner, id, cost).await {
                Ok(decision) => decision,
                Err(RatelimitError::Cancelled) => {
                    // Shutdown caught the forward mid-flight. Not a peer
                    // failure: answer from local state without the
                    // fail-open bookkeeping.
                    tracing::debug!(
                        owner = %owner,
                        "forward cancelled by shutdown; serving rate limit locally"
                    );
                    self.inner.local_take(fingerprint, id, cost).await
                },
                Err(err) => {
                    self.inner.metrics.record_peer_unavailable();
                    self.inner.metrics.record_failed_open();
                    tracing::warn!(
                        owner = %owner,
                        error = %err,
                        "owner unreachable; serving rate limit locally (fail open)"
                    );
                    self.inner.local_take(fingerprint, id, cost).await
                },
            },
        };

        self.inner.metrics.record_decision(decision.success);
        decision
    }

    /// Forwards a take to the owning instance.
    ///
    /// # Errors
    ///
    /// Returns [`RatelimitError::PeerUnavailable`] on timeout or transport
    /// failure, and [`RatelimitError::Cancelled`] when shutdown interrupts
    /// the RPC mid-flight.
    async fn forward(
        &self,
        owner: &Instance,
        id: &RatelimitIdentifier,
        cost: i64,
    ) -> Result<RatelimitDecision, RatelimitError> {
        let started = Instant::now();
        let mut client = self.inner.peers.client(owner)?;
        let request = TakeRequest {
            namespace: id.namespace.clone(),
            identifier: id.identifier.clone(),
            duration_ms: id.duration_ms,
            limit: id.limit,
            cost,
        };

        let call = tokio::time::timeout(self.inner.config.rpc_timeout, client.take(request));
        let response = tokio::select! {
            () = self.inner.token.cancelled() => return Err(RatelimitError::Cancelled),
            result = call => result
                .map_err(|_| RatelimitError::peer_unavailable("take rpc timed out"))?
                .map_err(|status| RatelimitError::peer_unavailable(status.to_string()))?
                .into_inner(),
        };

        self.inner.metrics.record_forward(started.elapsed());
        Ok(RatelimitDecision {
            success: response.success,
            remaining: response.remaining,
            reset_ms: response.reset_ms,
        })
    }

    /// Returns the metrics handle.
    #[must_use]
    pub fn metrics(&self) -> &RatelimitMetrics {
        &self.inner.metrics
    }

    /// Returns the number of live windows (test and debugging aid).
    #[must_use]
    pub fn window_count(&self) -> usize {
        self.inner.windows.window_count()
    }

    /// Returns the replicated counter for one `(fingerprint, sequence)`
    /// slot, if present.
    #[must_use]
    pub fn window_counter(&self, fingerprint: u64, sequence: i64) -> Option<i64> {
        self.inner.windows.counter(fingerprint, sequence)
    }

    pub(crate) fn inner(&self) -> Arc<ServiceInner> {
        Arc::clone(&self.inner)
    }

    /// Stops background tasks after a final gossip drain.
    ///
    /// The final flush is bounded by the configured drain deadline. Call
    /// after the cluster has left the membership so no new shard traffic
    /// arrives during the drain.
    pub async fn shutdown(&self) {
        self.inner.token.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        tracing::debug!("ratelimit service stopped");
    }
}
