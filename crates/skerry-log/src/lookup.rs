//! Read-side index: entries and proofs up to the serving tree head.

use std::collections::HashMap;
use std::sync::Arc;

use skerry_coord::ConsistentStore;
use skerry_db::EntryDb;
use skerry_merkle::MerkleLog;
use skerry_types::events::{EventBus, ServingSthAdvanced};
use skerry_types::{Entry, LeafHash, SignedTreeHead};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::error::LogError;

type Result<T> = std::result::Result<T, LogError>;

struct LookupState {
    /// Full tree over the served prefix; read-only between adoptions.
    tree: MerkleLog,
    /// Leaf hash → sequence, for `get-proof-by-hash`.
    index: HashMap<[u8; 32], u64>,
    /// The head this state serves.
    serving: Option<SignedTreeHead>,
}

/// Proof- and entry-serving index.
///
/// Rebuilt incrementally when the serving tree head advances; proofs are
/// only ever issued against tree sizes the serving head covers, so
/// clients never see state the cluster hasn't agreed to serve.
pub struct LogLookup {
    db: Arc<EntryDb>,
    state: RwLock<LookupState>,
}

impl LogLookup {
    /// Create an empty lookup over the node's entry database.
    pub fn new(db: Arc<EntryDb>) -> Self {
        Self {
            db,
            state: RwLock::new(LookupState {
                tree: MerkleLog::new(),
                index: HashMap::new(),
                serving: None,
            }),
        }
    }

    /// The head currently served, if any.
    pub async fn serving_sth(&self) -> Option<SignedTreeHead> {
        self.state.read().await.serving.clone()
    }

    /// Adopt a serving head: extend the tree and index to cover it and
    /// check the recomputed root against the head.
    ///
    /// A root mismatch means the local database contradicts the signed
    /// head — a fatal condition, and the head is not adopted.
    pub async fn adopt(&self, sth: SignedTreeHead) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(current) = &state.serving {
            if sth.tree_size <= current.tree_size {
                return Ok(());
            }
        }
        if sth.tree_size > self.db.latest_contiguous_sequence() {
            return Err(LogError::Conflict(format!(
                "serving head covers {} entries, local database holds {}",
                sth.tree_size,
                self.db.latest_contiguous_sequence()
            )));
        }

        let start = state.tree.size();
        for seq in start..sth.tree_size {
            let entry = self.db.read(seq)?.ok_or_else(|| {
                LogError::Fatal(format!("gap at {seq} below the contiguous watermark"))
            })?;
            let leaf_hash = entry.leaf_hash();
            state.tree.append_leaf_hash(leaf_hash);
            state.index.insert(*leaf_hash.as_bytes(), seq);
        }

        let root = state.tree.root_at(sth.tree_size)?;
        if root != sth.root_hash {
            return Err(LogError::Fatal(format!(
                "local root disagrees with serving head at size {}",
                sth.tree_size
            )));
        }

        info!(tree_size = sth.tree_size, "lookup adopted serving head");
        state.serving = Some(sth);
        Ok(())
    }

    /// Tree size proofs may currently reference.
    async fn served_size(&self, requested: u64) -> Result<u64> {
        let state = self.state.read().await;
        let served = state.serving.as_ref().map(|s| s.tree_size).unwrap_or(0);
        if requested > served {
            return Err(LogError::Validation(format!(
                "tree size {requested} beyond the serving head ({served})"
            )));
        }
        Ok(requested)
    }

    /// Entry plus its inclusion proof at `tree_size`.
    pub async fn get_entry_and_proof(
        &self,
        seq: u64,
        tree_size: u64,
    ) -> Result<(Entry, Vec<[u8; 32]>)> {
        let tree_size = self.served_size(tree_size).await?;
        let state = self.state.read().await;
        let proof = state.tree.inclusion_proof(seq, tree_size)?;
        drop(state);
        let entry = self
            .db
            .read(seq)?
            .ok_or_else(|| LogError::Fatal(format!("served tree references missing {seq}")))?;
        Ok((entry, proof))
    }

    /// Sequence number and inclusion proof for a leaf hash.
    pub async fn get_proof_by_hash(
        &self,
        leaf_hash: &LeafHash,
        tree_size: u64,
    ) -> Result<Option<(u64, Vec<[u8; 32]>)>> {
        let tree_size = self.served_size(tree_size).await?;
        let state = self.state.read().await;
        let Some(&seq) = state.index.get(leaf_hash.as_bytes()) else {
            return Ok(None);
        };
        if seq >= tree_size {
            // Sequenced, but after the requested view of the tree.
            return Ok(None);
        }
        let proof = state.tree.inclusion_proof(seq, tree_size)?;
        Ok(Some((seq, proof)))
    }

    /// Consistency proof between two served sizes.
    pub async fn get_consistency(&self, old_size: u64, new_size: u64) -> Result<Vec<[u8; 32]>> {
        let new_size = self.served_size(new_size).await?;
        let state = self.state.read().await;
        Ok(state.tree.consistency_proof(old_size, new_size)?)
    }
}

/// Background loop keeping a [`LogLookup`] in step with the cluster.
///
/// Listens for serving-head adoption events and polls the coordination
/// store as a fallback, so the index converges even when events are
/// missed.
pub struct LookupUpdater {
    lookup: Arc<LogLookup>,
    store: ConsistentStore,
    bus: EventBus,
    poll_interval: std::time::Duration,
}

impl LookupUpdater {
    /// Create an updater.
    pub fn new(lookup: Arc<LogLookup>, store: ConsistentStore, bus: EventBus) -> Self {
        Self {
            lookup,
            store,
            bus,
            poll_interval: std::time::Duration::from_secs(2),
        }
    }

    /// Override the fallback poll cadence.
    pub fn with_poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.bus.subscribe::<ServingSthAdvanced>();
        let mut interval = tokio::time::interval(self.poll_interval);
        info!("lookup updater started");
        loop {
            let sth = tokio::select! {
                event = events.recv() => event.map(|e| e.sth),
                _ = interval.tick() => match self.store.serving_sth().await {
                    Ok(sth) => sth,
                    Err(e) => {
                        debug!(%e, "failed to poll serving head");
                        None
                    }
                },
                _ = shutdown.changed() => break,
            };
            let Some(sth) = sth else { continue };
            match self.lookup.adopt(sth).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    warn!(%e, "lookup refused serving head, stopping");
                    break;
                }
                // Not yet replicated locally; the poll retries.
                Err(e) => debug!(%e, "serving head not adoptable yet"),
            }
        }
        info!("lookup updater stopped");
    }
}
