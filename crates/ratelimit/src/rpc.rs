//! Peer RPC: the tonic service answering forwards and gossip, plus the
//! lazily-connected client pool.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use keygrid_cluster::Instance;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint, Server};

use crate::{
    error::RatelimitError,
    identifier::RatelimitIdentifier,
    proto::v1::{
        SyncRequest, SyncResponse, TakeRequest, TakeResponse,
        ratelimit_client::RatelimitClient,
        ratelimit_server::{Ratelimit, RatelimitServer},
    },
    service::{RatelimitService, ServiceInner},
};

/// Lazily-connected channels to peer instances, keyed by instance id.
///
/// Channels are created on first use and dropped on leave events; a dead
/// channel simply fails its next call, which the caller treats as
/// `PeerUnavailable`.
pub(crate) struct PeerPool {
    clients: Mutex<HashMap<String, RatelimitClient<Channel>>>,
}

impl PeerPool {
    pub(crate) fn new() -> Self {
        Self { clients: Mutex::new(HashMap::new()) }
    }

    /// Returns (building if needed) the client for a peer.
    pub(crate) fn client(
        &self,
        instance: &Instance,
    ) -> Result<RatelimitClient<Channel>, RatelimitError> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&instance.instance_id) {
            return Ok(client.clone());
        }
        let endpoint = Endpoint::from_shared(format!("http://{}", instance.rpc_addr()))
            .map_err(|err| RatelimitError::transport(err.to_string()))?;
        let client = RatelimitClient::new(endpoint.connect_lazy());
        clients.insert(instance.instance_id.clone(), client.clone());
        Ok(client)
    }

    /// Drops the cached channel for a departed peer.
    pub(crate) fn remove(&self, instance_id: &str) {
        if self.clients.lock().remove(instance_id).is_some() {
            tracing::debug!(instance_id, "dropped peer channel");
        }
    }
}

/// Tonic service handling forwarded takes and gossip frames.
struct PeerService {
    inner: Arc<ServiceInner>,
}

#[tonic::async_trait]
impl Ratelimit for PeerService {
    async fn take(
        &self,
        request: tonic::Request<TakeRequest>,
    ) -> Result<tonic::Response<TakeResponse>, tonic::Status> {
        let request = request.into_inner();
        let id = RatelimitIdentifier::new(
            request.namespace,
            request.identifier,
            request.duration_ms,
            request.limit,
        );
        // A forwarded take is enforced locally regardless of the local
        // ring view, so disagreeing views cannot produce forward loops.
        let decision = self.inner.local_take(id.fingerprint(), &id, request.cost).await;
        self.inner.metrics.record_decision(decision.success);
        Ok(tonic::Response::new(TakeResponse {
            success: decision.success,
            remaining: decision.remaining,
            reset_ms: decision.reset_ms,
        }))
    }

    async fn sync(
        &self,
        request: tonic::Request<SyncRequest>,
    ) -> Result<tonic::Response<SyncResponse>, tonic::Status> {
        let request = request.into_inner();
        let now_ms = self.inner.clock.now_unix_ms();
        tracing::trace!(
            origin = %request.origin_instance_id,
            increments = request.increments.len(),
            snapshots = request.snapshots.len(),
            "gossip frame received"
        );
        for increment in request.increments {
            self.inner.windows.apply_increment(
                increment.fingerprint,
                increment.sequence,
                increment.delta,
                increment.duration_ms,
                now_ms,
            );
        }
        for snapshot in request.snapshots {
            self.inner.windows.merge_snapshot(
                snapshot.fingerprint,
                snapshot.sequence,
                snapshot.counter,
                snapshot.duration_ms,
                now_ms,
            );
        }
        Ok(tonic::Response::new(SyncResponse {}))
    }
}

/// A bound-but-not-yet-serving peer listener.
///
/// Binding is split from serving so callers can learn the ephemeral port
/// (to advertise in their [`Instance`]) before the service exists.
pub struct PeerServer {
    listener: tokio::net::TcpListener,
    local_addr: SocketAddr,
}

impl PeerServer {
    /// Binds the listener. Use port 0 for an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns [`RatelimitError::Transport`] when the address cannot bind.
    pub async fn bind(addr: SocketAddr) -> Result<Self, RatelimitError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|err| RatelimitError::transport(err.to_string()))?;
        let local_addr =
            listener.local_addr().map_err(|err| RatelimitError::transport(err.to_string()))?;
        Ok(Self { listener, local_addr })
    }

    /// Returns the bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts serving the given service. The returned handle stops the
    /// server on shutdown.
    #[must_use]
    pub fn spawn(self, service: &RatelimitService) -> ServerHandle {
        let inner = service.inner();
        let token = CancellationToken::new();
        let child = token.clone();
        let local_addr = self.local_addr;
        let handle = tokio::spawn(async move {
            let incoming = TcpListenerStream::new(self.listener);
            let serve = Server::builder()
                .add_service(RatelimitServer::new(PeerService { inner }))
                .serve_with_incoming_shutdown(incoming, child.cancelled_owned());
            if let Err(err) = serve.await {
                tracing::warn!(error = %err, "ratelimit server exited with error");
            }
        });
        tracing::debug!(addr = %local_addr, "ratelimit server started");
        ServerHandle { token, handle, local_addr }
    }
}

/// Handle to a running peer server.
pub struct ServerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Returns the serving address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the server and waits for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}
