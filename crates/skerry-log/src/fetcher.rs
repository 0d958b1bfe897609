//! Mirror mode: verified windowed pull from an upstream log.
//!
//! A mirror never signs. It follows the upstream's tree heads, pulls the
//! missing entry range in fixed-size windows with bounded concurrency,
//! checks every window boundary against the upstream root with an
//! inclusion proof, commits entries in order, and finally recomputes the
//! full root before adopting the upstream head locally.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use skerry_db::EntryDb;
use skerry_merkle::{verify, CompactTree};
use skerry_types::{Entry, SignedTreeHead};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::LogError;
use crate::signer::SthVerifier;

type Result<T> = std::result::Result<T, LogError>;

/// Interface to the log being mirrored.
///
/// Implemented over the upstream's public API by the frontend layer;
/// tests implement it in-process.
#[async_trait::async_trait]
pub trait UpstreamLog: Send + Sync {
    /// The upstream's current signed tree head.
    async fn get_sth(&self) -> Result<SignedTreeHead>;

    /// Entries `[start, end)` in sequence order.
    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<Entry>>;

    /// Inclusion proof for the leaf at `index` in the tree at `tree_size`.
    async fn get_inclusion_proof(&self, index: u64, tree_size: u64) -> Result<Vec<[u8; 32]>>;
}

/// Fetcher tuning.
#[derive(Debug, Clone, Copy)]
pub struct FetcherConfig {
    /// Concurrent window downloads.
    pub parallelism: usize,
    /// Entries per window.
    pub window_size: u64,
    /// Sleep between catch-up rounds when already current.
    pub poll_interval: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            window_size: 256,
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Pulls an upstream log into the local entry database.
pub struct Fetcher {
    db: Arc<EntryDb>,
    upstream: Arc<dyn UpstreamLog>,
    verifier: SthVerifier,
    config: FetcherConfig,
}

impl Fetcher {
    /// Create a fetcher verifying against the upstream's public key.
    pub fn new(
        db: Arc<EntryDb>,
        upstream: Arc<dyn UpstreamLog>,
        verifier: SthVerifier,
        config: FetcherConfig,
    ) -> Self {
        Self {
            db,
            upstream,
            verifier,
            config,
        }
    }

    /// Run until shutdown, catching up whenever the upstream grows.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("fetcher started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.catch_up_once().await {
                Ok(0) => {}
                Ok(n) => info!(fetched = n, "mirror caught up"),
                Err(e) if e.is_fatal() => {
                    warn!(%e, "fatal mirror error, stopping");
                    break;
                }
                Err(e) => warn!(%e, "mirror round failed, will retry"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("fetcher stopped");
    }

    /// One catch-up round. Returns the number of entries committed.
    pub async fn catch_up_once(&self) -> Result<u64> {
        let sth = self.upstream.get_sth().await?;
        self.verifier.verify_tree_head(&sth)?;

        let local = self.db.latest_contiguous_sequence();
        if sth.tree_size <= local {
            // Nothing new; still adopt a fresher head over known entries.
            self.db.store_tree_head(&sth)?;
            return Ok(0);
        }
        debug!(
            local,
            upstream = sth.tree_size,
            "pulling missing entry range"
        );

        // --- Fetch windows concurrently, verify each boundary. ---
        let windows = self.fetch_windows(&sth, local).await?;

        // --- Full-root check before anything touches the database: the
        // fetched range stitched onto the local prefix must reproduce
        // the signed root exactly. ---
        let mut tree = CompactTree::new();
        for seq in 0..local {
            let entry = self.db.read(seq)?.ok_or_else(|| {
                LogError::Fatal(format!("gap at {seq} below the contiguous watermark"))
            })?;
            tree.push(entry.leaf_hash());
        }
        for entries in windows.values() {
            for entry in entries {
                tree.push(entry.leaf_hash());
            }
        }
        if tree.size() != sth.tree_size {
            return Err(LogError::Conflict(format!(
                "upstream range incomplete: stitched {} of {}",
                tree.size(),
                sth.tree_size
            )));
        }
        if tree.root() != sth.root_hash {
            return Err(LogError::Validation(format!(
                "fetched entries do not reproduce the upstream root at size {}",
                sth.tree_size
            )));
        }

        // --- Commit in order, then adopt the verified head. ---
        for (start, entries) in windows {
            for (offset, entry) in entries.into_iter().enumerate() {
                let seq = start + offset as u64;
                let leaf_hash = entry.leaf_hash();
                self.db.put_staged(&entry)?;
                self.db.assign_sequence(&leaf_hash, seq)?;
            }
        }
        self.db.store_tree_head(&sth)?;
        Ok(sth.tree_size - local)
    }

    /// Download `[local, sth.tree_size)` in windows with bounded
    /// concurrency. Each window's last entry is verified against the
    /// upstream root with an inclusion proof before the window is
    /// accepted.
    async fn fetch_windows(
        &self,
        sth: &SignedTreeHead,
        local: u64,
    ) -> Result<BTreeMap<u64, Vec<Entry>>> {
        let mut starts: Vec<u64> = (local..sth.tree_size)
            .step_by(self.config.window_size.max(1) as usize)
            .collect();
        let mut windows = BTreeMap::new();

        while !starts.is_empty() {
            let round: Vec<u64> = starts
                .drain(..starts.len().min(self.config.parallelism.max(1)))
                .collect();
            let mut tasks = JoinSet::new();
            for start in round {
                let end = (start + self.config.window_size).min(sth.tree_size);
                let upstream = self.upstream.clone();
                let sth = sth.clone();
                tasks.spawn(async move {
                    let entries = upstream.get_entries(start, end).await?;
                    if entries.len() as u64 != end - start {
                        return Err(LogError::Validation(format!(
                            "upstream returned {} entries for [{start}, {end})",
                            entries.len()
                        )));
                    }
                    // Boundary check: the window's last leaf must prove
                    // into the upstream root.
                    let boundary = end - 1;
                    let leaf_hash = entries[(boundary - start) as usize].leaf_hash();
                    let proof = upstream.get_inclusion_proof(boundary, sth.tree_size).await?;
                    verify::verify_inclusion(
                        &leaf_hash,
                        boundary,
                        sth.tree_size,
                        &proof,
                        &sth.root_hash,
                    )
                    .map_err(|e| {
                        LogError::Validation(format!(
                            "window boundary {boundary} fails inclusion: {e}"
                        ))
                    })?;
                    Ok::<(u64, Vec<Entry>), LogError>((start, entries))
                });
            }
            while let Some(joined) = tasks.join_next().await {
                let (start, entries) = joined
                    .map_err(|e| LogError::Fatal(format!("fetch task panicked: {e}")))??;
                windows.insert(start, entries);
            }
        }
        Ok(windows)
    }
}
