//! Gossip replication of window counters.
//!
//! The batcher drains the increment queue on a short interval and ships
//! one frame per peer. Every `snapshot_every` flushes the frame also
//! carries the full window state for anti-entropy: replicas max-merge
//! snapshots, so increments lost to peer churn or frame drops heal within
//! one snapshot round.
//!
//! Backpressure policy: increments are never dropped — producers wait on
//! the bounded queue instead. Snapshot payloads are shed first when the
//! queue runs hot, since they are redundant with the next round.

use std::{collections::HashMap, sync::Arc};

use tokio::{sync::mpsc, time::MissedTickBehavior};

use crate::{
    proto::v1::{Increment, SyncRequest, WindowSnapshot},
    service::{IncrementEvent, ServiceInner},
    window::WindowState,
};

/// Drives the gossip batcher until shutdown, then performs a final drain.
pub(crate) async fn run(inner: Arc<ServiceInner>, mut increments_rx: mpsc::Receiver<IncrementEvent>) {
    let mut ticker = tokio::time::interval(inner.config.gossip_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut flushes: u32 = 0;

    loop {
        tokio::select! {
            () = inner.token.cancelled() => break,
            _ = ticker.tick() => {},
        }
        flushes = flushes.wrapping_add(1);
        let with_snapshots = flushes % inner.config.snapshot_every == 0;
        flush(&inner, &mut increments_rx, with_snapshots).await;
    }

    // Final drain: whatever is still queued goes out once, with snapshots,
    // bounded by the drain deadline.
    increments_rx.close();
    let drain = flush(&inner, &mut increments_rx, true);
    if tokio::time::timeout(inner.config.drain_deadline, drain).await.is_err() {
        tracing::warn!("gossip drain exceeded deadline; remaining state not replicated");
    }
    tracing::debug!("gossip batcher stopped");
}

/// Drains the queue, builds one frame and ships it to every peer.
async fn flush(
    inner: &Arc<ServiceInner>,
    increments_rx: &mut mpsc::Receiver<IncrementEvent>,
    with_snapshots: bool,
) {
    // Aggregate queued deltas per window so a hot budget ships one
    // increment, not one per request.
    let mut aggregated: HashMap<(u64, i64, i64), i64> = HashMap::new();
    let mut drained = 0usize;
    while let Ok(event) = increments_rx.try_recv() {
        drained += 1;
        *aggregated
            .entry((event.fingerprint, event.sequence, event.duration_ms))
            .or_default() += event.delta;
    }

    let mut with_snapshots = with_snapshots;
    if with_snapshots && drained >= inner.config.queue_capacity / 2 {
        // The queue is running hot: increments take priority, snapshots
        // ride the next quiet round.
        inner.metrics.record_snapshot_shed();
        with_snapshots = false;
    }

    let increments: Vec<Increment> = aggregated
        .into_iter()
        .map(|((fingerprint, sequence, duration_ms), delta)| Increment {
            fingerprint,
            sequence,
            delta,
            duration_ms,
        })
        .collect();

    let snapshots: Vec<WindowSnapshot> = if with_snapshots {
        let now_ms = inner.clock.now_unix_ms();
        inner
            .windows
            .entries()
            .into_iter()
            .filter(|entry| {
                crate::window::Window::new(entry.sequence, entry.duration_ms).state(now_ms)
                    != WindowState::Evicted
            })
            .map(|entry| WindowSnapshot {
                fingerprint: entry.fingerprint,
                sequence: entry.sequence,
                counter: entry.counter,
                duration_ms: entry.duration_ms,
            })
            .collect()
    } else {
        Vec::new()
    };

    if increments.is_empty() && snapshots.is_empty() {
        return;
    }

    let self_id = inner.cluster.self_instance().instance_id.clone();
    let peers: Vec<_> = inner
        .cluster
        .instances()
        .into_iter()
        .filter(|instance| instance.instance_id != self_id)
        .collect();
    if peers.is_empty() {
        return;
    }

    inner.metrics.record_gossip_increments(increments.len());
    let request = SyncRequest { origin_instance_id: self_id, increments, snapshots };

    for peer in peers {
        let delivered = match inner.peers.client(&peer) {
            Ok(mut client) => {
                let call = client.sync(request.clone());
                match tokio::time::timeout(inner.config.rpc_timeout, call).await {
                    Ok(Ok(_)) => true,
                    Ok(Err(status)) => {
                        tracing::debug!(peer = %peer, status = %status, "gossip frame rejected");
                        false
                    },
                    Err(_) => {
                        tracing::debug!(peer = %peer, "gossip frame timed out");
                        false
                    },
                }
            },
            Err(err) => {
                tracing::debug!(peer = %peer, error = %err, "no channel for gossip frame");
                false
            },
        };
        inner.metrics.record_gossip_frame(delivered);
    }
}
