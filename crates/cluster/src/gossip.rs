//! Gossip-based membership over a push-pull state exchange.
//!
//! Each node keeps a digest of every member it has heard of:
//! `{instance, incarnation, state ∈ {Alive, Suspect, Left}}`. A probe loop
//! periodically picks a random peer and exchanges full digests over the
//! `MemberSync` RPC; merge keeps, per member, the higher incarnation, and
//! at equal incarnation the more severe state (`Left > Suspect > Alive`).
//!
//! Failure detection: an unreachable probe target becomes `Suspect`; a
//! suspect that stays silent for the suspicion timeout is declared gone and
//! a leave event fires. A node that sees itself suspected in a peer digest
//! refutes by re-announcing with a higher incarnation. Left members remain
//! as tombstones for a retention window so stale digests cannot resurrect
//! them.
//!
//! Deployments of size one should use
//! [`NoopMembership`](crate::membership::NoopMembership) instead; the
//! protocol here only earns its keep with peers.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::{
    config::GossipConfig,
    error::ClusterError,
    events::Topic,
    instance::Instance,
    membership::Membership,
    proto::v1::{
        Member, MemberState, SyncRequest, SyncResponse,
        member_sync_client::MemberSyncClient,
        member_sync_server::{MemberSync, MemberSyncServer},
    },
};

/// Liveness state tracked per member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Health {
    Alive,
    Suspect,
    Left,
}

impl Health {
    /// Merge precedence at equal incarnation.
    fn severity(self) -> u8 {
        match self {
            Self::Alive => 0,
            Self::Suspect => 1,
            Self::Left => 2,
        }
    }

    fn to_wire(self) -> MemberState {
        match self {
            Self::Alive => MemberState::Alive,
            Self::Suspect => MemberState::Suspect,
            Self::Left => MemberState::Left,
        }
    }

    fn from_wire(state: MemberState) -> Option<Self> {
        match state {
            MemberState::Alive => Some(Self::Alive),
            MemberState::Suspect => Some(Self::Suspect),
            MemberState::Left => Some(Self::Left),
            MemberState::Unspecified => None,
        }
    }
}

struct MemberEntry {
    instance: Instance,
    gossip_port: u16,
    incarnation: u64,
    health: Health,
    /// Instant of the last state change, driving suspicion and tombstone
    /// expiry.
    since: Instant,
}

struct GossipInner {
    config: GossipConfig,
    gossip_port: u16,
    members: Mutex<HashMap<String, MemberEntry>>,
    join_events: Topic<Instance>,
    leave_events: Topic<Instance>,
    token: CancellationToken,
}

impl GossipInner {
    fn self_instance(&self) -> Instance {
        Instance::new(
            self.config.instance_id.clone(),
            self.config.advertise_host.clone(),
            self.config.rpc_port,
        )
    }

    /// Builds the full wire digest of everything this node knows.
    fn digest(&self) -> Vec<Member> {
        self.members
            .lock()
            .values()
            .map(|entry| Member {
                instance_id: entry.instance.instance_id.clone(),
                host: entry.instance.host.clone(),
                rpc_port: u32::from(entry.instance.rpc_port),
                gossip_port: u32::from(entry.gossip_port),
                incarnation: entry.incarnation,
                state: entry.health.to_wire() as i32,
            })
            .collect()
    }

    /// Merges a remote digest, publishing join/leave events for state
    /// transitions it causes. Events are published after the lock drops.
    fn merge(&self, remote_members: Vec<Member>) {
        let mut joins = Vec::new();
        let mut leaves = Vec::new();
        {
            let now = Instant::now();
            let mut members = self.members.lock();
            for remote in remote_members {
                let Some(health) = MemberState::try_from(remote.state)
                    .ok()
                    .and_then(Health::from_wire)
                else {
                    continue;
                };
                let instance = Instance::new(
                    remote.instance_id.clone(),
                    remote.host.clone(),
                    remote.rpc_port as u16,
                );

                if remote.instance_id == self.config.instance_id {
                    // A peer thinks badly of us: refute with a higher
                    // incarnation so the rumor dies out.
                    if let Some(entry) = members.get_mut(&self.config.instance_id) {
                        if health != Health::Alive
                            && remote.incarnation >= entry.incarnation
                            && entry.health == Health::Alive
                        {
                            entry.incarnation = remote.incarnation + 1;
                            entry.since = now;
                            tracing::debug!(
                                incarnation = entry.incarnation,
                                "refuted suspicion about self"
                            );
                        }
                    }
                    continue;
                }

                match members.get_mut(&remote.instance_id) {
                    None => {
                        if health != Health::Left {
                            joins.push(instance.clone());
                        }
                        members.insert(
                            remote.instance_id.clone(),
                            MemberEntry {
                                instance,
                                gossip_port: remote.gossip_port as u16,
                                incarnation: remote.incarnation,
                                health,
                                since: now,
                            },
                        );
                    },
                    Some(entry) => {
                        let newer = remote.incarnation > entry.incarnation
                            || (remote.incarnation == entry.incarnation
                                && health.severity() > entry.health.severity());
                        if !newer {
                            continue;
                        }
                        let was_live = entry.health != Health::Left;
                        let is_live = health != Health::Left;
                        entry.instance = instance.clone();
                        entry.gossip_port = remote.gossip_port as u16;
                        entry.incarnation = remote.incarnation;
                        entry.health = health;
                        entry.since = now;
                        if was_live && !is_live {
                            leaves.push(instance);
                        } else if !was_live && is_live {
                            joins.push(instance);
                        }
                    },
                }
            }
        }
        for instance in joins {
            tracing::info!(instance = %instance, "member joined");
            self.join_events.publish(instance);
        }
        for instance in leaves {
            tracing::info!(instance = %instance, "member left");
            self.leave_events.publish(instance);
        }
    }

    /// Marks a peer suspect after a failed probe. Does not publish an
    /// event; the leave fires only after the suspicion timeout.
    fn suspect(&self, instance_id: &str) {
        let mut members = self.members.lock();
        if let Some(entry) = members.get_mut(instance_id) {
            if entry.health == Health::Alive {
                entry.health = Health::Suspect;
                entry.since = Instant::now();
                tracing::debug!(instance_id, "member suspected after failed probe");
            }
        }
    }

    /// Expires suspects past the suspicion timeout and drops old
    /// tombstones. Returns the instances to announce as left.
    fn sweep(&self) -> Vec<Instance> {
        let now = Instant::now();
        let mut leaves = Vec::new();
        let mut members = self.members.lock();
        for entry in members.values_mut() {
            if entry.health == Health::Suspect
                && now.duration_since(entry.since) >= self.config.suspicion_timeout
            {
                entry.health = Health::Left;
                entry.since = now;
                leaves.push(entry.instance.clone());
            }
        }
        members.retain(|instance_id, entry| {
            let expired = entry.health == Health::Left
                && *instance_id != self.config.instance_id
                && now.duration_since(entry.since) >= self.config.tombstone_retention;
            !expired
        });
        leaves
    }

    /// Picks a random probe target among live peers.
    fn pick_probe_target(&self) -> Option<(String, String)> {
        let members = self.members.lock();
        let candidates: Vec<(String, String)> = members
            .values()
            .filter(|entry| {
                entry.health != Health::Left
                    && entry.instance.instance_id != self.config.instance_id
            })
            .map(|entry| {
                (
                    entry.instance.instance_id.clone(),
                    format!("{}:{}", entry.instance.host, entry.gossip_port),
                )
            })
            .collect();
        drop(members);
        candidates.choose(&mut rand::thread_rng()).cloned()
    }

    /// One push-pull exchange with a peer's gossip address.
    async fn sync_with(&self, gossip_addr: &str) -> Result<SyncResponse, ClusterError> {
        let endpoint = format!("http://{gossip_addr}");
        let exchange = async {
            let mut client = MemberSyncClient::connect(endpoint)
                .await
                .map_err(|err| ClusterError::transport(err.to_string()))?;
            let request = SyncRequest {
                from_instance_id: self.config.instance_id.clone(),
                members: self.digest(),
            };
            client
                .sync(request)
                .await
                .map(tonic::Response::into_inner)
                .map_err(|err| ClusterError::transport(err.to_string()))
        };
        tokio::time::timeout(self.config.sync_timeout, exchange)
            .await
            .map_err(|_| ClusterError::transport(format!("sync with {gossip_addr} timed out")))?
    }
}

/// Tonic service answering peer digests.
struct MemberSyncService {
    inner: Arc<GossipInner>,
}

#[tonic::async_trait]
impl MemberSync for MemberSyncService {
    async fn sync(
        &self,
        request: tonic::Request<SyncRequest>,
    ) -> Result<tonic::Response<SyncResponse>, tonic::Status> {
        let request = request.into_inner();
        tracing::trace!(from = %request.from_instance_id, "gossip sync received");
        self.inner.merge(request.members);
        Ok(tonic::Response::new(SyncResponse { members: self.inner.digest() }))
    }
}

/// Networked [`Membership`] implementation.
///
/// Start with [`GossipMembership::start`]; the instance owns its gossip
/// server and probe loop and tears both down on [`leave`](Membership::leave).
pub struct GossipMembership {
    inner: Arc<GossipInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    left: AtomicBool,
}

impl GossipMembership {
    /// Binds the gossip listener, syncs the configured seeds and starts the
    /// probe loop.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Transport`] when the listener cannot bind.
    /// Seed sync failures are logged, not fatal — peers may simply not be
    /// up yet.
    pub async fn start(config: GossipConfig) -> Result<Self, ClusterError> {
        let listener = tokio::net::TcpListener::bind(config.gossip_bind)
            .await
            .map_err(|err| ClusterError::transport(err.to_string()))?;
        let gossip_port = listener
            .local_addr()
            .map_err(|err| ClusterError::transport(err.to_string()))?
            .port();

        let inner = Arc::new(GossipInner {
            gossip_port,
            members: Mutex::new(HashMap::new()),
            join_events: Topic::new(),
            leave_events: Topic::new(),
            token: CancellationToken::new(),
            config,
        });

        // Register self before anything can observe the map.
        {
            let self_instance = inner.self_instance();
            inner.members.lock().insert(
                self_instance.instance_id.clone(),
                MemberEntry {
                    instance: self_instance,
                    gossip_port,
                    incarnation: 0,
                    health: Health::Alive,
                    since: Instant::now(),
                },
            );
        }

        let server_inner = Arc::clone(&inner);
        let server_token = inner.token.clone();
        let server_task = tokio::spawn(async move {
            let service = MemberSyncServer::new(MemberSyncService { inner: server_inner });
            let incoming = TcpListenerStream::new(listener);
            let serve = Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(incoming, server_token.cancelled_owned());
            if let Err(err) = serve.await {
                tracing::warn!(error = %err, "gossip server exited with error");
            }
        });

        // Best-effort seed bootstrap.
        for seed in inner.config.seeds.clone() {
            match inner.sync_with(&seed).await {
                Ok(response) => inner.merge(response.members),
                Err(err) => {
                    tracing::warn!(seed = %seed, error = %err, "seed sync failed");
                },
            }
        }

        let probe_inner = Arc::clone(&inner);
        let probe_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(probe_inner.config.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = probe_inner.token.cancelled() => break,
                    _ = ticker.tick() => {},
                }

                for instance in probe_inner.sweep() {
                    tracing::info!(instance = %instance, "member declared gone");
                    probe_inner.leave_events.publish(instance);
                }

                if let Some((instance_id, gossip_addr)) = probe_inner.pick_probe_target() {
                    match probe_inner.sync_with(&gossip_addr).await {
                        Ok(response) => probe_inner.merge(response.members),
                        Err(err) => {
                            tracing::debug!(
                                instance_id = %instance_id,
                                error = %err,
                                "probe failed"
                            );
                            probe_inner.suspect(&instance_id);
                        },
                    }
                }
            }
            tracing::debug!("gossip probe loop stopped");
        });

        Ok(Self {
            inner,
            tasks: Mutex::new(vec![server_task, probe_task]),
            left: AtomicBool::new(false),
        })
    }

    /// Returns the gossip listener address peers should use as a seed.
    #[must_use]
    pub fn gossip_addr(&self) -> String {
        format!("{}:{}", self.inner.config.advertise_host, self.inner.gossip_port)
    }

    /// Returns this node's instance descriptor.
    #[must_use]
    pub fn self_instance(&self) -> Instance {
        self.inner.self_instance()
    }
}

#[async_trait]
impl Membership for GossipMembership {
    fn members(&self) -> Vec<Instance> {
        self.inner
            .members
            .lock()
            .values()
            .filter(|entry| entry.health != Health::Left)
            .map(|entry| entry.instance.clone())
            .collect()
    }

    fn subscribe_join_events(&self) -> mpsc::UnboundedReceiver<Instance> {
        self.inner.join_events.subscribe("gossip.join")
    }

    fn subscribe_leave_events(&self) -> mpsc::UnboundedReceiver<Instance> {
        self.inner.leave_events.subscribe("gossip.leave")
    }

    async fn leave(&self) -> Result<(), ClusterError> {
        if self.left.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Announce departure with a final incarnation bump so the rumor
        // outlives us.
        let peers: Vec<String> = {
            let mut members = self.inner.members.lock();
            if let Some(entry) = members.get_mut(&self.inner.config.instance_id) {
                entry.health = Health::Left;
                entry.incarnation += 1;
                entry.since = Instant::now();
            }
            members
                .values()
                .filter(|entry| {
                    entry.health != Health::Left
                        && entry.instance.instance_id != self.inner.config.instance_id
                })
                .map(|entry| format!("{}:{}", entry.instance.host, entry.gossip_port))
                .collect()
        };

        for gossip_addr in peers.iter().take(3) {
            if let Err(err) = self.inner.sync_with(gossip_addr).await {
                tracing::debug!(peer = %gossip_addr, error = %err, "leave notification failed");
            }
        }

        self.inner.token.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!(instance_id = %self.inner.config.instance_id, "left the cluster");
        Ok(())
    }
}

impl Drop for GossipMembership {
    /// Dropping without [`leave`](Membership::leave) stops the server and
    /// probe loop but announces nothing — peers detect the silence through
    /// suspicion, exactly as they would a crash.
    fn drop(&mut self) {
        self.inner.token.cancel();
    }
}
