//! The sequencing loop: the only place tree heads are born.
//!
//! Runs on the elected leader. Each iteration drains pending entries
//! from the coordination store, assigns them dense sequence numbers
//! (CAS-serialised cluster-wide), commits them to the local entry
//! database, extends the compact tree, signs a tree head, publishes it,
//! and garbage-collects covered pending entries.
//!
//! Crash recovery needs no special cases: the compact tree is resynced
//! from the entry database at the top of every iteration, reservations
//! found in the sequence mapping are replayed into the database before
//! new ones are made, and no head is published unless the root covers
//! exactly the contiguous local prefix.

use std::sync::Arc;
use std::time::Duration;

use skerry_coord::{CoordError, StrictStore};
use skerry_db::EntryDb;
use skerry_merkle::CompactTree;
use skerry_types::events::{EntriesSequenced, EventBus, SthPublished};
use skerry_types::{now_millis, LeafHash, PendingEntry};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::LogError;
use crate::signer::SthSigner;

type Result<T> = std::result::Result<T, LogError>;

/// Sequencing parameters.
#[derive(Debug, Clone, Copy)]
pub struct SequencerConfig {
    /// Maximum entries drained per iteration.
    pub batch_limit: usize,
    /// Sleep between iterations. Together with the merge delay this
    /// bounds how stale a promised-but-unsequenced entry can get; keep
    /// `signing_interval ≪ mmd`.
    pub signing_interval: Duration,
    /// Maximum merge delay promised by issued SCTs.
    pub mmd: Duration,
    /// Refuse to sign when preserving timestamp monotonicity would
    /// require moving the clock forward by more than this.
    pub max_clock_skew_ms: u64,
    /// Wall-clock budget for one iteration; entries sequenced before the
    /// budget ran out are still committed and published.
    pub iteration_budget: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            batch_limit: 1000,
            signing_interval: Duration::from_secs(1),
            mmd: Duration::from_secs(24 * 60 * 60),
            max_clock_skew_ms: 10_000,
            iteration_budget: Duration::from_secs(30),
        }
    }
}

/// The leader's sequencing loop.
pub struct Sequencer {
    db: Arc<EntryDb>,
    strict: StrictStore,
    signer: Arc<SthSigner>,
    config: SequencerConfig,
    bus: EventBus,
    /// Right-edge roots of the locally sequenced prefix. Owned
    /// exclusively by this loop.
    tree: CompactTree,
}

impl Sequencer {
    /// Create a sequencer bound to a leadership signal via `strict`.
    pub fn new(
        db: Arc<EntryDb>,
        strict: StrictStore,
        signer: Arc<SthSigner>,
        config: SequencerConfig,
        bus: EventBus,
    ) -> Self {
        Self {
            db,
            strict,
            signer,
            config,
            bus,
            tree: CompactTree::new(),
        }
    }

    /// Run until shutdown. Iterations happen only while the leadership
    /// signal is up; a fatal error stops the loop entirely.
    pub async fn run(
        mut self,
        mut leadership: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("sequencer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if !*leadership.borrow() {
                // Parked: wake on leadership or shutdown.
                tokio::select! {
                    _ = leadership.changed() => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            match self.iterate().await {
                Ok(sequenced) => {
                    if sequenced > 0 {
                        debug!(sequenced, "sequencing iteration complete");
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(%e, "fatal sequencing error, refusing to sign");
                    break;
                }
                Err(e) => {
                    warn!(%e, kind = ?e.kind(), "sequencing iteration failed, will retry");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.signing_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("sequencer stopped");
    }

    /// One sequencing iteration. Returns the number of newly sequenced
    /// entries (a tree head is published whenever the tree grew).
    pub async fn iterate(&mut self) -> Result<u64> {
        let deadline = Instant::now() + self.config.iteration_budget;
        let store = self.strict.store().clone();

        // --- 1. Local state; resync the compact tree to the database. ---
        let contiguous = self.db.latest_contiguous_sequence();
        let current_sth = self.db.latest_tree_head()?;
        let current_size = current_sth.as_ref().map(|s| s.tree_size).unwrap_or(0);
        if current_size > contiguous {
            return Err(LogError::Fatal(format!(
                "tree head covers {current_size} entries but only {contiguous} are present"
            )));
        }
        self.resync_tree(contiguous)?;

        // --- 2. Drain pending entries; replay existing reservations. ---
        let pending = store.get_pending_entries(self.config.batch_limit).await?;
        let mapping = store.sequence_mapping().await?;

        let mut batch: Vec<(LeafHash, PendingEntry)> = Vec::new();
        let mut sequenced: Vec<(LeafHash, u64)> = Vec::new();
        for item in pending {
            let leaf_hash = item.entry.leaf_hash();
            if let Some(seq) = self.db.lookup_by_hash(&leaf_hash)? {
                // Sequenced by a previous incarnation; only GC remains.
                debug!(%leaf_hash, seq, "pending entry already sequenced");
                sequenced.push((leaf_hash, seq));
                continue;
            }
            if let Some(seq) = mapping.sequence_for(&leaf_hash) {
                // Reserved but not yet committed locally (crash between
                // reservation and commit). Replay the commit.
                self.db.put_staged(&item.entry)?;
                self.db.assign_sequence(&leaf_hash, seq)?;
                sequenced.push((leaf_hash, seq));
                continue;
            }
            batch.push((leaf_hash, item));
        }

        let mmd_ms = self.config.mmd.as_millis() as u64;
        let now = now_millis();
        for (leaf_hash, item) in &batch {
            if now.saturating_sub(item.sct_timestamp_ms) > mmd_ms {
                // An unkept promise is an operational emergency, but the
                // cure is still to sequence the entry.
                error!(%leaf_hash, promised = item.sct_timestamp_ms, "entry exceeded the merge delay");
            }
        }

        // --- 3. Reserve, then commit, in promised-timestamp order. ---
        let mut next_seq = store.next_available_sequence_number().await?;
        for (leaf_hash, item) in batch {
            if Instant::now() >= deadline {
                warn!(
                    committed = sequenced.len(),
                    "iteration budget exhausted mid-batch"
                );
                break;
            }
            if !self.strict.is_leader() {
                return Err(LogError::Conflict("leadership lost mid-batch".into()));
            }

            let seq = next_seq;
            match self.strict.assign_sequence_number(&leaf_hash, seq).await {
                Ok(()) => {}
                Err(e @ (CoordError::AlreadyExists | CoordError::CasFailed { .. })) => {
                    // Another party owns this sequence or entry; stop and
                    // re-read state next iteration.
                    warn!(%leaf_hash, seq, %e, "reservation conflict, aborting batch");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            self.db.put_staged(&item.entry)?;
            self.db.assign_sequence(&leaf_hash, seq)?;
            sequenced.push((leaf_hash, seq));
            next_seq += 1;
        }

        // --- 4. Sign whatever the database now covers contiguously. ---
        let new_size = self.db.latest_contiguous_sequence();
        self.resync_tree(new_size)?;
        if new_size == current_size {
            // Nothing new to commit; still clear leftovers an earlier
            // head already covers.
            self.gc_covered(&sequenced, current_size).await?;
            return Ok(0);
        }

        let timestamp = self.monotonic_timestamp(&current_sth)?;
        let sth = self
            .signer
            .sign_tree_head(new_size, timestamp, self.tree.root());

        // --- 5. Publish; leadership is re-verified by the strict store
        // immediately prior to the write. ---
        self.strict.publish_sth(&sth).await?;
        self.db.store_tree_head(&sth)?;
        info!(
            tree_size = sth.tree_size,
            timestamp = sth.timestamp_ms,
            "published tree head"
        );
        self.bus.emit(SthPublished { sth: sth.clone() });
        self.bus.emit(EntriesSequenced {
            count: new_size - current_size,
            new_size,
        });

        // --- 6. Garbage-collect everything the head now covers. ---
        self.gc_covered(&sequenced, sth.tree_size).await?;
        self.strict
            .release_covered_assignments(sth.tree_size)
            .await?;

        Ok(new_size - current_size)
    }

    /// Remove pending records whose sequence the head at `tree_size`
    /// covers. Uncovered ones stay until a later head reaches them.
    async fn gc_covered(&self, sequenced: &[(LeafHash, u64)], tree_size: u64) -> Result<()> {
        for (leaf_hash, seq) in sequenced {
            if *seq < tree_size {
                self.strict.remove_pending(leaf_hash).await?;
            }
        }
        Ok(())
    }

    /// Bring the compact tree up to the first `target` database entries.
    fn resync_tree(&mut self, target: u64) -> Result<()> {
        if self.tree.size() > target {
            // Only possible if the database shrank underneath us.
            return Err(LogError::Fatal(format!(
                "compact tree at {} ahead of database at {target}",
                self.tree.size()
            )));
        }
        for seq in self.tree.size()..target {
            let entry = self.db.read(seq)?.ok_or_else(|| {
                LogError::Fatal(format!("gap at {seq} below the contiguous watermark"))
            })?;
            self.tree.push(entry.leaf_hash());
        }
        Ok(())
    }

    /// Strictly monotonic signing timestamp, bounded by the skew limit.
    fn monotonic_timestamp(
        &self,
        current: &Option<skerry_types::SignedTreeHead>,
    ) -> Result<u64> {
        let now = now_millis();
        let floor = current.as_ref().map(|s| s.timestamp_ms + 1).unwrap_or(0);
        let skew = floor.saturating_sub(now);
        if skew > self.config.max_clock_skew_ms {
            return Err(LogError::Fatal(format!(
                "clock is {skew}ms behind the previous tree head, beyond the {}ms limit",
                self.config.max_clock_skew_ms
            )));
        }
        if skew > 0 {
            warn!(skew_ms = skew, "clock behind previous tree head");
        }
        Ok(now.max(floor))
    }
}
