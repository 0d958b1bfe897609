//! Lease-based leader election.
//!
//! Each node proposes under `<root>/election/<node_id>` with a bounded
//! TTL lease. The proposal with the lowest creation revision holds the
//! signing lease. The winner refreshes its lease on a short interval;
//! if a refresh fails, or too much time passes since the last successful
//! refresh, the local leadership signal drops *before* the lease can
//! expire on the service side — a paused or partitioned leader stops
//! signing before peers can elect a successor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use skerry_types::events::{EventBus, LeadershipChanged};
use skerry_types::NodeId;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::CoordBackend;
use crate::error::CoordError;
use crate::store::ConsistentStore;

/// Election timing parameters.
#[derive(Debug, Clone, Copy)]
pub struct ElectionConfig {
    /// Proposal lease time-to-live. Loss of the lease deposes the leader.
    pub lease_ttl: Duration,
    /// Refresh cadence; must be well below `lease_ttl`.
    pub refresh_interval: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(2),
        }
    }
}

impl ElectionConfig {
    /// A refresh must have succeeded within this window for the local
    /// leadership signal to stay up. One refresh interval of margin is
    /// kept below the TTL so the signal drops first.
    fn liveness_window(&self) -> Duration {
        self.lease_ttl.saturating_sub(self.refresh_interval)
    }
}

/// Handle to a running election participant.
pub struct ElectionHandle {
    leadership: watch::Receiver<bool>,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ElectionHandle {
    /// A signal that is `true` exactly while this node may sign.
    pub fn leadership(&self) -> watch::Receiver<bool> {
        self.leadership.clone()
    }

    /// `true` if this node currently holds the signing lease.
    pub fn is_leader(&self) -> bool {
        *self.leadership.borrow()
    }

    /// Resign (if leading) and stop campaigning.
    pub fn resign(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Whether the election task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Abort the background task without cleanup.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Start campaigning for leadership of the log rooted at `store.root()`.
pub fn start(
    backend: Arc<dyn CoordBackend>,
    store: ConsistentStore,
    node_id: NodeId,
    config: ElectionConfig,
    bus: EventBus,
) -> ElectionHandle {
    let (leadership_tx, leadership_rx) = watch::channel(false);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(election_loop(
        backend,
        store,
        node_id,
        config,
        bus,
        leadership_tx,
        shutdown_rx,
    ));

    ElectionHandle {
        leadership: leadership_rx,
        shutdown: shutdown_tx,
        task,
    }
}

async fn election_loop(
    backend: Arc<dyn CoordBackend>,
    store: ConsistentStore,
    node_id: NodeId,
    config: ElectionConfig,
    bus: EventBus,
    leadership: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(%node_id, "election participant started");

    while !*shutdown.borrow() {
        // --- Propose ---
        let lease = match backend.grant_lease(config.lease_ttl).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(%e, "failed to obtain election lease, backing off");
                if wait_or_shutdown(&mut shutdown, backoff(config.refresh_interval)).await {
                    break;
                }
                continue;
            }
        };

        let key = store.election_key(&node_id);
        match backend
            .insert(&key, node_id.as_bytes().to_vec(), Some(lease))
            .await
        {
            Ok(_) => {}
            Err(CoordError::AlreadyExists) => {
                // A previous incarnation's proposal hasn't expired yet.
                debug!("stale proposal still present, waiting for it to lapse");
                let _ = backend.revoke_lease(lease).await;
                if wait_or_shutdown(&mut shutdown, config.refresh_interval).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                warn!(%e, "failed to write election proposal");
                let _ = backend.revoke_lease(lease).await;
                if wait_or_shutdown(&mut shutdown, backoff(config.refresh_interval)).await {
                    break;
                }
                continue;
            }
        }

        // --- Campaign: wait until our proposal has the lowest creation
        // revision, keeping the proposal lease alive meanwhile. ---
        let mut last_refresh = Instant::now();
        let mut won = false;
        loop {
            if *shutdown.borrow() {
                break;
            }
            match lowest_proposal(&backend, &store).await {
                Ok(Some(lowest_key)) if lowest_key == key => {
                    won = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => debug!(%e, "failed to list election proposals"),
            }
            if wait_or_shutdown(&mut shutdown, config.refresh_interval).await {
                break;
            }
            match backend.keep_alive(lease).await {
                Ok(()) => last_refresh = Instant::now(),
                Err(_) => break, // proposal gone; re-propose
            }
        }

        if !won {
            let _ = backend.revoke_lease(lease).await;
            continue;
        }

        // --- Lead ---
        info!(%node_id, "elected leader");
        let _ = leadership.send(true);
        bus.emit(LeadershipChanged {
            node_id,
            is_leader: true,
        });

        loop {
            if wait_or_shutdown(&mut shutdown, config.refresh_interval).await {
                break;
            }
            match backend.keep_alive(lease).await {
                Ok(()) => {
                    last_refresh = Instant::now();
                }
                Err(e) => {
                    warn!(%e, "lease refresh failed, stepping down");
                    break;
                }
            }
            if last_refresh.elapsed() > config.liveness_window() {
                warn!("lease refresh overdue, stepping down before expiry");
                break;
            }
        }

        // Drop the local signal before touching the service so strict
        // writes stop first.
        let _ = leadership.send(false);
        bus.emit(LeadershipChanged {
            node_id,
            is_leader: false,
        });
        info!(%node_id, "leadership ended");
        let _ = backend.revoke_lease(lease).await;
    }

    let _ = leadership.send(false);
    info!(%node_id, "election participant stopped");
}

/// Key of the proposal with the lowest creation revision, if any.
async fn lowest_proposal(
    backend: &Arc<dyn CoordBackend>,
    store: &ConsistentStore,
) -> Result<Option<String>, CoordError> {
    let proposals = backend.list(&store.election_prefix()).await?;
    Ok(proposals
        .into_iter()
        .min_by_key(|(_, record)| record.create_rev)
        .map(|(key, _)| key))
}

/// Sleep for `period`, returning `true` if shutdown was signalled.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}

/// Jittered backoff: the base period plus up to half again.
fn backoff(base: Duration) -> Duration {
    let jitter = rand::random_range(0..=(base.as_millis() as u64 / 2).max(1));
    base + Duration::from_millis(jitter)
}
