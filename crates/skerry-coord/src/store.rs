//! Per-log namespaces over the coordination backend.
//!
//! Key layout under the log root (e.g. `/skerry/<log-name>`):
//!
//! ```text
//! <root>/entries/<leaf_hash>   pending entry + promised timestamp
//! <root>/sequence_mapping      CAS-protected counter and reservations
//! <root>/nodes/<node_id>       heartbeated node state (lease-backed)
//! <root>/election/<node_id>    leader-election proposals (lease-backed)
//! <root>/sth                   latest tree head published by the leader
//! <root>/serving_sth           tree head currently served to clients
//! <root>/cluster_config        quorum and freshness policy
//! ```
//!
//! All values are postcard-encoded. Reads may be stale and carry the
//! record's modification revision; every mutation states its expectation
//! explicitly.

use std::sync::Arc;
use std::time::Duration;

use skerry_types::{
    ClusterConfig, ClusterNodeState, LeafHash, NodeId, PendingEntry, SignedTreeHead,
};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::backend::{CoordBackend, LeaseId, WatchEvent};
use crate::error::CoordError;

type Result<T> = std::result::Result<T, CoordError>;

/// Default per-operation deadline.
pub(crate) const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of [`ConsistentStore::add_pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The entry was accepted; the caller's SCT timestamp stands.
    Created,
    /// The entry was already pending or sequenced; the caller must reuse
    /// the original promised timestamp for SCT idempotency.
    AlreadyExists {
        /// Timestamp promised by the first accepted submission.
        sct_timestamp_ms: u64,
    },
}

/// The CAS-protected sequence state under `<root>/sequence_mapping`.
///
/// `assigned` is partial: reservations are dropped once a published tree
/// head covers them, keeping the record small.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SequenceMapping {
    /// Next sequence number not yet reserved.
    pub next_seq: u64,
    /// Outstanding reservations: leaf hash → assigned sequence.
    pub assigned: Vec<(LeafHash, u64)>,
}

impl SequenceMapping {
    /// Sequence reserved for a leaf hash, if any.
    pub fn sequence_for(&self, leaf_hash: &LeafHash) -> Option<u64> {
        self.assigned
            .iter()
            .find(|(h, _)| h == leaf_hash)
            .map(|(_, s)| *s)
    }

    fn sequence_taken(&self, seq: u64) -> bool {
        self.assigned.iter().any(|(_, s)| *s == seq)
    }
}

/// Read side and follower-write side of the per-log control plane.
///
/// Mutations the whole cluster must agree on (sequence assignment, tree
/// head publication, pending GC) live on [`StrictStore`] instead.
#[derive(Clone)]
pub struct ConsistentStore {
    backend: Arc<dyn CoordBackend>,
    root: String,
    op_timeout: Duration,
}

impl ConsistentStore {
    /// Create a store rooted at `<root>` (no trailing slash).
    pub fn new(backend: Arc<dyn CoordBackend>, root: impl Into<String>) -> Self {
        Self {
            backend,
            root: root.into(),
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Override the per-operation deadline.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// The backing KV service.
    pub fn backend(&self) -> &Arc<dyn CoordBackend> {
        &self.backend
    }

    /// The log root prefix.
    pub fn root(&self) -> &str {
        &self.root
    }

    // ----- Key construction -----

    fn entries_prefix(&self) -> String {
        format!("{}/entries/", self.root)
    }

    fn entry_key(&self, leaf_hash: &LeafHash) -> String {
        format!("{}/entries/{}", self.root, leaf_hash.to_hex())
    }

    fn sequence_mapping_key(&self) -> String {
        format!("{}/sequence_mapping", self.root)
    }

    fn nodes_prefix(&self) -> String {
        format!("{}/nodes/", self.root)
    }

    fn node_key(&self, node_id: &NodeId) -> String {
        format!("{}/nodes/{}", self.root, node_id)
    }

    /// Election proposals live under this prefix; see [`crate::election`].
    pub(crate) fn election_prefix(&self) -> String {
        format!("{}/election/", self.root)
    }

    pub(crate) fn election_key(&self, node_id: &NodeId) -> String {
        format!("{}/election/{}", self.root, node_id)
    }

    fn sth_key(&self) -> String {
        format!("{}/sth", self.root)
    }

    fn serving_sth_key(&self) -> String {
        format!("{}/serving_sth", self.root)
    }

    fn cluster_config_key(&self) -> String {
        format!("{}/cluster_config", self.root)
    }

    // ----- Deadline plumbing -----

    pub(crate) async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoordError::Deadline),
        }
    }

    // ----- Pending entries -----

    /// CAS-insert a pending entry under its leaf hash.
    ///
    /// Idempotent across concurrent submitters: exactly one insert wins;
    /// the rest observe the winner's promised timestamp.
    pub async fn add_pending(&self, pending: &PendingEntry) -> Result<AddOutcome> {
        let key = self.entry_key(&pending.entry.leaf_hash());
        let value = postcard::to_allocvec(pending)?;

        match self.bounded(self.backend.insert(&key, value, None)).await {
            Ok(_) => Ok(AddOutcome::Created),
            Err(CoordError::AlreadyExists) => {
                let record = self
                    .bounded(self.backend.get(&key))
                    .await?
                    .ok_or(CoordError::NotFound)?;
                let existing: PendingEntry = postcard::from_bytes(&record.value)?;
                Ok(AddOutcome::AlreadyExists {
                    sct_timestamp_ms: existing.sct_timestamp_ms,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Up to `limit` pending entries, oldest promised timestamp first,
    /// ties broken by leaf hash.
    pub async fn get_pending_entries(&self, limit: usize) -> Result<Vec<PendingEntry>> {
        let records = self
            .bounded(self.backend.list(&self.entries_prefix()))
            .await?;
        let mut entries = Vec::with_capacity(records.len());
        for (_, record) in records {
            entries.push(postcard::from_bytes::<PendingEntry>(&record.value)?);
        }
        entries.sort_by(|a, b| {
            a.sct_timestamp_ms
                .cmp(&b.sct_timestamp_ms)
                .then_with(|| a.entry.leaf_hash().cmp(&b.entry.leaf_hash()))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    /// A single pending entry, if present.
    pub async fn get_pending(&self, leaf_hash: &LeafHash) -> Result<Option<PendingEntry>> {
        let key = self.entry_key(leaf_hash);
        match self.bounded(self.backend.get(&key)).await? {
            Some(record) => Ok(Some(postcard::from_bytes(&record.value)?)),
            None => Ok(None),
        }
    }

    // ----- Sequence mapping -----

    /// The current sequence mapping (empty if never written).
    pub async fn sequence_mapping(&self) -> Result<SequenceMapping> {
        let key = self.sequence_mapping_key();
        match self.bounded(self.backend.get(&key)).await? {
            Some(record) => Ok(postcard::from_bytes(&record.value)?),
            None => Ok(SequenceMapping::default()),
        }
    }

    /// First sequence number available for reservation: past everything
    /// the published tree head covers and everything already reserved.
    pub async fn next_available_sequence_number(&self) -> Result<u64> {
        let mapping = self.sequence_mapping().await?;
        let sth_size = self.latest_sth().await?.map(|s| s.tree_size).unwrap_or(0);
        Ok(mapping.next_seq.max(sth_size))
    }

    // ----- Cluster node states -----

    /// Publish this node's state, attached to its heartbeat lease.
    ///
    /// Creates or CAS-overwrites the node's own key; a lost CAS means a
    /// previous incarnation raced and the next heartbeat settles it.
    pub async fn set_cluster_node_state(
        &self,
        state: &ClusterNodeState,
        lease: LeaseId,
    ) -> Result<()> {
        let key = self.node_key(&state.node_id);
        let value = postcard::to_allocvec(state)?;

        match self.bounded(self.backend.get(&key)).await? {
            Some(record) => {
                self.bounded(self.backend.update(&key, value, record.mod_rev))
                    .await?;
            }
            None => {
                self.bounded(self.backend.insert(&key, value, Some(lease)))
                    .await?;
            }
        }
        Ok(())
    }

    /// All live node states.
    pub async fn get_cluster_node_states(&self) -> Result<Vec<ClusterNodeState>> {
        let records = self.bounded(self.backend.list(&self.nodes_prefix())).await?;
        let mut states = Vec::with_capacity(records.len());
        for (_, record) in records {
            states.push(postcard::from_bytes::<ClusterNodeState>(&record.value)?);
        }
        Ok(states)
    }

    // ----- Tree heads and config -----

    /// Latest tree head published by the leader.
    pub async fn latest_sth(&self) -> Result<Option<SignedTreeHead>> {
        let key = self.sth_key();
        match self.bounded(self.backend.get(&key)).await? {
            Some(record) => Ok(Some(postcard::from_bytes(&record.value)?)),
            None => Ok(None),
        }
    }

    /// Tree head currently served to external clients.
    pub async fn serving_sth(&self) -> Result<Option<SignedTreeHead>> {
        let key = self.serving_sth_key();
        match self.bounded(self.backend.get(&key)).await? {
            Some(record) => Ok(Some(postcard::from_bytes(&record.value)?)),
            None => Ok(None),
        }
    }

    /// Advance the serving tree head.
    ///
    /// Monotonicity is enforced: the size never decreases and two heads
    /// at the same size must agree on the root. Any node may run the
    /// serving computation, so this is plain CAS rather than strict.
    pub async fn set_serving_sth(&self, sth: &SignedTreeHead) -> Result<()> {
        let key = self.serving_sth_key();
        let value = postcard::to_allocvec(sth)?;

        match self.bounded(self.backend.get(&key)).await? {
            Some(record) => {
                let current: SignedTreeHead = postcard::from_bytes(&record.value)?;
                if sth.tree_size < current.tree_size {
                    return Err(CoordError::InvalidTransition(format!(
                        "serving tree head would regress from {} to {}",
                        current.tree_size, sth.tree_size
                    )));
                }
                if sth.tree_size == current.tree_size && sth.root_hash != current.root_hash {
                    return Err(CoordError::InvalidTransition(format!(
                        "conflicting roots at tree size {}",
                        sth.tree_size
                    )));
                }
                if sth.tree_size == current.tree_size {
                    // Same head; nothing to do.
                    return Ok(());
                }
                self.bounded(self.backend.update(&key, value, record.mod_rev))
                    .await?;
            }
            None => {
                self.bounded(self.backend.insert(&key, value, None)).await?;
            }
        }
        debug!(tree_size = sth.tree_size, "serving tree head advanced");
        Ok(())
    }

    /// Cluster policy, falling back to defaults when unset.
    pub async fn cluster_config(&self) -> Result<ClusterConfig> {
        let key = self.cluster_config_key();
        match self.bounded(self.backend.get(&key)).await? {
            Some(record) => Ok(postcard::from_bytes(&record.value)?),
            None => Ok(ClusterConfig::default()),
        }
    }

    /// Install the cluster policy (operator action; create or overwrite).
    pub async fn set_cluster_config(&self, config: &ClusterConfig) -> Result<()> {
        let key = self.cluster_config_key();
        let value = postcard::to_allocvec(config)?;
        match self.bounded(self.backend.get(&key)).await? {
            Some(record) => {
                self.bounded(self.backend.update(&key, value, record.mod_rev))
                    .await?;
            }
            None => {
                self.bounded(self.backend.insert(&key, value, None)).await?;
            }
        }
        Ok(())
    }

    // ----- Watches -----

    /// Watch the serving tree head for changes.
    pub async fn watch_serving_sth(&self) -> Result<mpsc::Receiver<WatchEvent>> {
        self.bounded(self.backend.watch(&self.serving_sth_key()))
            .await
    }

    /// Watch the published tree head for changes.
    pub async fn watch_sth(&self) -> Result<mpsc::Receiver<WatchEvent>> {
        self.bounded(self.backend.watch(&self.sth_key())).await
    }
}

// ---------------------------------------------------------------------------
// Strict store
// ---------------------------------------------------------------------------

/// Leader-only mutation surface.
///
/// Wraps a [`ConsistentStore`] with the leadership signal from the
/// election. Every mutation checks the signal first and fails with
/// [`CoordError::LeaseExpired`] once leadership is gone — a former
/// leader paused past its lease cannot write.
pub struct StrictStore {
    store: ConsistentStore,
    leadership: watch::Receiver<bool>,
}

impl StrictStore {
    /// Bind a store to a leadership signal.
    pub fn new(store: ConsistentStore, leadership: watch::Receiver<bool>) -> Self {
        Self { store, leadership }
    }

    /// The underlying non-strict store.
    pub fn store(&self) -> &ConsistentStore {
        &self.store
    }

    /// `true` while this node holds the signing lease.
    pub fn is_leader(&self) -> bool {
        *self.leadership.borrow()
    }

    fn ensure_leader(&self) -> Result<()> {
        if self.is_leader() {
            Ok(())
        } else {
            Err(CoordError::LeaseExpired)
        }
    }

    /// Reserve `seq` for `leaf_hash` in the sequence mapping.
    ///
    /// Fails as a conflict when the hash already has a sequence or the
    /// sequence is already taken (another leader raced — re-read state).
    pub async fn assign_sequence_number(&self, leaf_hash: &LeafHash, seq: u64) -> Result<()> {
        self.ensure_leader()?;
        let key = self.store.sequence_mapping_key();

        let (mut mapping, rev) = match self.store.bounded(self.store.backend.get(&key)).await? {
            Some(record) => (
                postcard::from_bytes::<SequenceMapping>(&record.value)?,
                Some(record.mod_rev),
            ),
            None => (SequenceMapping::default(), None),
        };

        if let Some(existing) = mapping.sequence_for(leaf_hash) {
            if existing == seq {
                return Ok(());
            }
            return Err(CoordError::CasFailed {
                expected: seq,
                actual: existing,
            });
        }
        if mapping.sequence_taken(seq) {
            return Err(CoordError::AlreadyExists);
        }

        mapping.assigned.push((*leaf_hash, seq));
        mapping.next_seq = mapping.next_seq.max(seq + 1);
        let value = postcard::to_allocvec(&mapping)?;

        self.ensure_leader()?;
        match rev {
            Some(rev) => {
                self.store
                    .bounded(self.store.backend.update(&key, value, rev))
                    .await?;
            }
            None => {
                self.store
                    .bounded(self.store.backend.insert(&key, value, None))
                    .await?;
            }
        }
        Ok(())
    }

    /// Publish a freshly signed tree head.
    ///
    /// Leadership is re-checked immediately before the write; sizes never
    /// regress and timestamps are strictly monotonic.
    pub async fn publish_sth(&self, sth: &SignedTreeHead) -> Result<()> {
        self.ensure_leader()?;
        let key = self.store.sth_key();
        let value = postcard::to_allocvec(sth)?;

        match self.store.bounded(self.store.backend.get(&key)).await? {
            Some(record) => {
                let current: SignedTreeHead = postcard::from_bytes(&record.value)?;
                if sth.tree_size < current.tree_size {
                    return Err(CoordError::InvalidTransition(format!(
                        "tree head would regress from {} to {}",
                        current.tree_size, sth.tree_size
                    )));
                }
                if sth.timestamp_ms <= current.timestamp_ms {
                    return Err(CoordError::InvalidTransition(format!(
                        "tree head timestamp {} not after {}",
                        sth.timestamp_ms, current.timestamp_ms
                    )));
                }
                self.ensure_leader()?;
                self.store
                    .bounded(self.store.backend.update(&key, value, record.mod_rev))
                    .await?;
            }
            None => {
                self.ensure_leader()?;
                self.store
                    .bounded(self.store.backend.insert(&key, value, None))
                    .await?;
            }
        }
        Ok(())
    }

    /// Drop reservations covered by a published tree head.
    pub async fn release_covered_assignments(&self, tree_size: u64) -> Result<()> {
        self.ensure_leader()?;
        let key = self.store.sequence_mapping_key();
        let Some(record) = self.store.bounded(self.store.backend.get(&key)).await? else {
            return Ok(());
        };
        let mut mapping: SequenceMapping = postcard::from_bytes(&record.value)?;
        let before = mapping.assigned.len();
        mapping.assigned.retain(|(_, seq)| *seq >= tree_size);
        if mapping.assigned.len() == before {
            return Ok(());
        }
        let value = postcard::to_allocvec(&mapping)?;
        self.store
            .bounded(self.store.backend.update(&key, value, record.mod_rev))
            .await?;
        Ok(())
    }

    /// Delete a pending entry once it is durably sequenced and covered.
    ///
    /// Tolerates the entry already being gone (a newer leader finished
    /// the job).
    pub async fn remove_pending(&self, leaf_hash: &LeafHash) -> Result<()> {
        self.ensure_leader()?;
        let key = self.store.entry_key(leaf_hash);
        match self.store.bounded(self.store.backend.get(&key)).await? {
            Some(record) => {
                match self
                    .store
                    .bounded(self.store.backend.remove(&key, record.mod_rev))
                    .await
                {
                    Ok(()) | Err(CoordError::NotFound) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            None => Ok(()),
        }
    }
}
