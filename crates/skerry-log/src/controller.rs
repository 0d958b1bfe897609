//! Cluster state controller: heartbeats and the serving tree head.
//!
//! Runs on every node. Each tick it publishes the node's replication
//! state (lease-backed, so a dead node's claim disappears with it),
//! adopts the leader's published tree head once local entries cover it,
//! and advances the cluster's serving tree head to the largest head that
//! a quorum of nodes holds and that is still fresh. Clients therefore
//! only ever see entries that are durably replicated.

use std::sync::Arc;
use std::time::Duration;

use skerry_coord::{ConsistentStore, CoordBackend, CoordError, LeaseId};
use skerry_db::EntryDb;
use skerry_types::events::{EventBus, ServingSthAdvanced};
use skerry_types::{now_millis, ClusterNodeState, NodeId, SignedTreeHead};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::LogError;

type Result<T> = std::result::Result<T, LogError>;

/// Controller timing parameters.
#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    /// Heartbeat and serving-computation cadence.
    pub heartbeat_interval: Duration,
    /// TTL of the lease backing this node's state key; must exceed the
    /// heartbeat interval with margin.
    pub node_lease_ttl: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(2),
            node_lease_ttl: Duration::from_secs(10),
        }
    }
}

/// Per-node control loop.
pub struct ClusterController {
    node_id: NodeId,
    db: Arc<EntryDb>,
    store: ConsistentStore,
    config: ControllerConfig,
    bus: EventBus,
    lease: Option<LeaseId>,
    last_serving_size: u64,
}

impl ClusterController {
    /// Create a controller for this node.
    pub fn new(
        node_id: NodeId,
        db: Arc<EntryDb>,
        store: ConsistentStore,
        config: ControllerConfig,
        bus: EventBus,
    ) -> Self {
        Self {
            node_id,
            db,
            store,
            config,
            bus,
            lease: None,
            last_serving_size: 0,
        }
    }

    /// Run until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(node_id = %self.node_id, "cluster controller started");
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.tick().await {
                if e.is_fatal() {
                    warn!(%e, "controller hit a fatal error, stopping");
                    break;
                }
                debug!(%e, "controller tick failed, will retry");
            }
        }
        info!(node_id = %self.node_id, "cluster controller stopped");
    }

    /// One controller tick.
    pub async fn tick(&mut self) -> Result<()> {
        self.adopt_published_sth().await?;
        self.heartbeat().await?;
        self.advance_serving_sth().await?;
        Ok(())
    }

    /// Adopt the leader's latest head once local entries cover it.
    async fn adopt_published_sth(&self) -> Result<()> {
        let Some(sth) = self.store.latest_sth().await? else {
            return Ok(());
        };
        let contiguous = self.db.latest_contiguous_sequence();
        if sth.tree_size <= contiguous {
            self.db.store_tree_head(&sth)?;
        }
        Ok(())
    }

    /// Publish this node's replication state under its heartbeat lease.
    async fn heartbeat(&mut self) -> Result<()> {
        let lease = self.ensure_lease().await?;
        let state = ClusterNodeState {
            node_id: self.node_id,
            newest_sth: self.db.latest_tree_head()?,
            contiguous_tree_size: self.db.latest_contiguous_sequence(),
            updated_at_ms: now_millis(),
        };
        self.store.set_cluster_node_state(&state, lease).await?;
        Ok(())
    }

    /// Keep the heartbeat lease alive, re-granting after expiry.
    async fn ensure_lease(&mut self) -> Result<LeaseId> {
        if let Some(lease) = self.lease {
            match self.store.backend().keep_alive(lease).await {
                Ok(()) => return Ok(lease),
                Err(CoordError::LeaseExpired) => {
                    warn!("heartbeat lease expired, re-granting");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let lease = self
            .store
            .backend()
            .grant_lease(self.config.node_lease_ttl)
            .await?;
        self.lease = Some(lease);
        Ok(lease)
    }

    /// Compute and CAS the serving tree head.
    async fn advance_serving_sth(&mut self) -> Result<()> {
        let cluster_config = self.store.cluster_config().await?;
        let states = self.store.get_cluster_node_states().await?;
        let current = self.store.serving_sth().await?;
        let current_size = current.as_ref().map(|s| s.tree_size).unwrap_or(0);

        let Some(candidate) = select_serving_sth(&states, &cluster_config, now_millis()) else {
            return Ok(());
        };
        if candidate.tree_size <= current_size {
            self.note_serving(current);
            return Ok(());
        }

        match self.store.set_serving_sth(&candidate).await {
            Ok(()) => {
                info!(tree_size = candidate.tree_size, "advanced serving tree head");
                self.note_serving(Some(candidate));
            }
            // Another controller advanced it concurrently; next tick
            // reconciles.
            Err(CoordError::CasFailed { .. }) | Err(CoordError::AlreadyExists) => {}
            Err(CoordError::InvalidTransition(reason)) => {
                debug!(%reason, "serving head moved ahead of our candidate");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Emit a local adoption event when the serving head moved forward.
    fn note_serving(&mut self, sth: Option<SignedTreeHead>) {
        if let Some(sth) = sth {
            if sth.tree_size > self.last_serving_size {
                self.last_serving_size = sth.tree_size;
                self.bus.emit(ServingSthAdvanced { sth });
            }
        }
    }
}

/// The serving head: the largest published head that at least `quorum`
/// nodes hold in full, and whose timestamp is within the freshness
/// window. Stale heads are never selected, so a partitioned minority
/// stalls rather than serving the past as current.
fn select_serving_sth(
    states: &[ClusterNodeState],
    config: &skerry_types::ClusterConfig,
    now_ms: u64,
) -> Option<SignedTreeHead> {
    let mut candidates: Vec<&SignedTreeHead> = states
        .iter()
        .filter_map(|s| s.newest_sth.as_ref())
        .collect();
    candidates.sort_by(|a, b| b.tree_size.cmp(&a.tree_size));
    candidates.dedup_by_key(|s| s.tree_size);

    for candidate in candidates {
        if now_ms.saturating_sub(candidate.timestamp_ms) > config.serving_freshness_window_ms {
            continue;
        }
        let holders = states
            .iter()
            .filter(|s| s.contiguous_tree_size >= candidate.tree_size)
            .count();
        if holders >= config.quorum as usize {
            return Some(candidate.clone());
        }
    }
    None
}
