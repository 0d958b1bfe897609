//! Shared test harness for Skerry integration tests.
//!
//! Provides [`IntegrationCluster`] — an N-node log cluster sharing one
//! in-memory coordination backend. Every node runs the real components:
//! election, sequencer, cluster controller, lookup updater, and a
//! fetcher that replicates entries from whichever peer holds them
//! (standing in for the out-of-scope transport).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use skerry_coord::{election, ConsistentStore, ElectionHandle, MemoryCoord, StrictStore};
use skerry_db::EntryDb;
use skerry_log::{
    ClusterController, ControllerConfig, Fetcher, FetcherConfig, LogError, LogLookup,
    LookupUpdater, Sequencer, SequencerConfig, SthSigner, SthVerifier, Submitter, UpstreamLog,
};
use skerry_merkle::MerkleLog;
use skerry_types::events::EventBus;
use skerry_types::{ClusterConfig, Entry, NodeId, SignedTreeHead};
use tokio::sync::watch;

/// Election timing tuned for fast test execution.
pub fn fast_election() -> skerry_coord::ElectionConfig {
    skerry_coord::ElectionConfig {
        lease_ttl: Duration::from_millis(400),
        refresh_interval: Duration::from_millis(80),
    }
}

/// Sequencer timing tuned for fast test execution.
pub fn fast_sequencer() -> SequencerConfig {
    SequencerConfig {
        batch_limit: 100,
        signing_interval: Duration::from_millis(40),
        mmd: Duration::from_secs(60),
        max_clock_skew_ms: 10_000,
        iteration_budget: Duration::from_secs(5),
    }
}

// =========================================================================
// Peer replication over the harness "transport"
// =========================================================================

/// Shared registry of every node's entry database.
pub type PeerDbs = Arc<std::sync::RwLock<Vec<Arc<EntryDb>>>>;

/// Upstream view of the cluster for a replicating node: serves entries
/// and proofs from whichever peer database holds the requested range,
/// and tree heads from the shared coordination store.
pub struct PeerUpstream {
    store: ConsistentStore,
    peers: PeerDbs,
}

impl PeerUpstream {
    /// Create an upstream view over a peer registry.
    pub fn new(store: ConsistentStore, peers: PeerDbs) -> Self {
        Self { store, peers }
    }

    fn peer_with(&self, size: u64) -> Result<Arc<EntryDb>, LogError> {
        self.peers
            .read()
            .expect("peer registry poisoned")
            .iter()
            .find(|db| db.latest_contiguous_sequence() >= size)
            .cloned()
            .ok_or_else(|| LogError::Conflict(format!("no peer holds {size} entries yet")))
    }
}

#[async_trait]
impl UpstreamLog for PeerUpstream {
    async fn get_sth(&self) -> Result<SignedTreeHead, LogError> {
        self.store
            .latest_sth()
            .await?
            .ok_or_else(|| LogError::Conflict("no tree head published yet".into()))
    }

    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<Entry>, LogError> {
        Ok(self.peer_with(end)?.read_range(start, end)?)
    }

    async fn get_inclusion_proof(
        &self,
        index: u64,
        tree_size: u64,
    ) -> Result<Vec<[u8; 32]>, LogError> {
        let db = self.peer_with(tree_size)?;
        let entries = db.read_range(0, tree_size)?;
        let log = MerkleLog::from_leaf_hashes(entries.iter().map(|e| e.leaf_hash()));
        Ok(log.inclusion_proof(index, tree_size)?)
    }
}

// =========================================================================
// Cluster node
// =========================================================================

/// One running log node with all its background tasks.
pub struct TestNode {
    pub node_id: NodeId,
    pub db: Arc<EntryDb>,
    pub lookup: Arc<LogLookup>,
    pub bus: EventBus,
    election: ElectionHandle,
    shutdown: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl TestNode {
    /// Whether this node currently holds the signing lease.
    pub fn is_leader(&self) -> bool {
        self.election.is_leader()
    }

    /// Hard-stop the node, as close to a crash as the harness gets:
    /// every task is aborted, no resignation, no cleanup. Leases lapse
    /// on their own.
    pub fn kill(&self) {
        self.election.abort();
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Graceful stop: resign leadership, then stop the loops.
    pub async fn stop(&self) {
        self.election.resign();
        let _ = self.shutdown.send(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        for task in &self.tasks {
            task.abort();
        }
    }
}

// =========================================================================
// Cluster
// =========================================================================

/// An N-node cluster over one shared in-memory coordination backend.
pub struct IntegrationCluster {
    pub backend: Arc<MemoryCoord>,
    pub store: ConsistentStore,
    pub signer: Arc<SthSigner>,
    pub nodes: Vec<TestNode>,
    peer_dbs: PeerDbs,
}

impl IntegrationCluster {
    /// Start `n` nodes agreeing on `quorum`.
    pub async fn start(n: usize, quorum: u32) -> Self {
        Self::start_with_backend(MemoryCoord::new(), n, quorum).await
    }

    /// Start `n` nodes over a pre-seeded coordination backend (used to
    /// model state left behind by a crashed cluster).
    pub async fn start_with_backend(backend: Arc<MemoryCoord>, n: usize, quorum: u32) -> Self {
        let store = ConsistentStore::new(backend.clone(), "/skerry/itest")
            .with_op_timeout(Duration::from_secs(2));
        store
            .set_cluster_config(&ClusterConfig {
                serving_freshness_window_ms: 60_000,
                quorum,
            })
            .await
            .expect("install cluster config");

        // One signing key for the log; every replica signs with it.
        let signer = Arc::new(SthSigner::new(SigningKey::from_bytes(&[42u8; 32])));

        let mut cluster = Self {
            backend,
            store,
            signer,
            nodes: Vec::new(),
            peer_dbs: Arc::new(std::sync::RwLock::new(Vec::new())),
        };
        for i in 0..n {
            cluster.spawn_node(i as u8);
        }
        cluster
    }

    /// Add one node to the cluster.
    pub fn spawn_node(&mut self, seed: u8) {
        let node_id = NodeId::from_data(&[b'n', seed]);
        let db = Arc::new(EntryDb::in_memory());
        let bus = EventBus::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let election = election::start(
            self.backend.clone(),
            self.store.clone(),
            node_id,
            fast_election(),
            bus.clone(),
        );

        let mut tasks = Vec::new();

        let sequencer = Sequencer::new(
            db.clone(),
            StrictStore::new(self.store.clone(), election.leadership()),
            self.signer.clone(),
            fast_sequencer(),
            bus.clone(),
        );
        tasks.push(tokio::spawn(
            sequencer.run(election.leadership(), shutdown_rx.clone()),
        ));

        let controller = ClusterController::new(
            node_id,
            db.clone(),
            self.store.clone(),
            ControllerConfig {
                heartbeat_interval: Duration::from_millis(60),
                node_lease_ttl: Duration::from_millis(600),
            },
            bus.clone(),
        );
        tasks.push(tokio::spawn(controller.run(shutdown_rx.clone())));

        let lookup = Arc::new(LogLookup::new(db.clone()));
        let updater = LookupUpdater::new(lookup.clone(), self.store.clone(), bus.clone())
            .with_poll_interval(Duration::from_millis(50));
        tasks.push(tokio::spawn(updater.run(shutdown_rx.clone())));

        // Peer replication: pull anything the local database is missing.
        self.peer_dbs
            .write()
            .expect("peer registry poisoned")
            .push(db.clone());
        let upstream = Arc::new(PeerUpstream {
            store: self.store.clone(),
            peers: self.peer_dbs.clone(),
        });
        let fetcher = Fetcher::new(
            db.clone(),
            upstream,
            SthVerifier::new(self.signer.verifying_key()),
            FetcherConfig {
                parallelism: 2,
                window_size: 8,
                poll_interval: Duration::from_millis(60),
            },
        );
        tasks.push(tokio::spawn(fetcher.run(shutdown_rx.clone())));

        self.nodes.push(TestNode {
            node_id,
            db,
            lookup,
            bus,
            election,
            shutdown: shutdown_tx,
            tasks,
        });
    }

    /// The shared registry of node databases.
    pub fn peer_dbs(&self) -> PeerDbs {
        self.peer_dbs.clone()
    }

    /// A submission handler going through node `i`.
    pub fn submitter(&self, i: usize) -> Submitter {
        Submitter::new(
            self.nodes[i].db.clone(),
            self.store.clone(),
            self.signer.clone(),
        )
    }

    /// Index of the current leader, if any.
    pub fn leader(&self) -> Option<usize> {
        self.nodes.iter().position(|n| n.is_leader())
    }

    /// Wait until some node is leader, returning its index.
    pub async fn wait_for_leader(&self, deadline: Duration) -> usize {
        wait_until(deadline, || async { self.leader() })
            .await
            .expect("a leader within the deadline")
    }

    /// Wait until the published tree head reaches `size`.
    pub async fn wait_for_tree_size(&self, size: u64, deadline: Duration) -> SignedTreeHead {
        wait_until(deadline, || async {
            match self.store.latest_sth().await {
                Ok(Some(sth)) if sth.tree_size >= size => Some(sth),
                _ => None,
            }
        })
        .await
        .unwrap_or_else(|| panic!("tree head never reached {size}"))
    }

    /// Wait until the serving tree head reaches `size`.
    pub async fn wait_for_serving_size(&self, size: u64, deadline: Duration) -> SignedTreeHead {
        wait_until(deadline, || async {
            match self.store.serving_sth().await {
                Ok(Some(sth)) if sth.tree_size >= size => Some(sth),
                _ => None,
            }
        })
        .await
        .unwrap_or_else(|| panic!("serving head never reached {size}"))
    }

    /// Stop every node gracefully.
    pub async fn stop_all(&self) {
        for node in &self.nodes {
            node.stop().await;
        }
    }
}

/// Poll `probe` until it yields a value or `deadline` elapses.
pub async fn wait_until<T, F, Fut>(deadline: Duration, probe: F) -> Option<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let start = tokio::time::Instant::now();
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if start.elapsed() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Deterministic certificate bytes for test entry `i`.
pub fn cert_bytes(i: u64) -> Vec<u8> {
    format!("integration-cert-{i}").into_bytes()
}
