//! Mirror fetcher behavior against an in-process upstream.

use std::sync::Arc;

use skerry_db::EntryDb;
use skerry_merkle::MerkleLog;
use skerry_types::{Entry, SignedTreeHead};
use tokio::sync::RwLock;

use super::{test_entry, test_signer};
use crate::{Fetcher, FetcherConfig, LogError, SthSigner, SthVerifier, UpstreamLog};

/// An upstream log living in memory, with optional corruption knobs.
struct FakeUpstream {
    signer: Arc<SthSigner>,
    state: RwLock<UpstreamState>,
    /// When set, `get_entries` swaps this sequence for a tampered entry.
    tamper_at: Option<u64>,
}

struct UpstreamState {
    entries: Vec<Entry>,
    tree: MerkleLog,
}

impl FakeUpstream {
    fn new(signer: Arc<SthSigner>, count: u64) -> Self {
        let entries: Vec<Entry> = (0..count).map(test_entry).collect();
        let tree = MerkleLog::from_leaf_hashes(entries.iter().map(|e| e.leaf_hash()));
        Self {
            signer,
            state: RwLock::new(UpstreamState { entries, tree }),
            tamper_at: None,
        }
    }

    fn tampered(mut self, seq: u64) -> Self {
        self.tamper_at = Some(seq);
        self
    }

    async fn grow_to(&self, count: u64) {
        let mut state = self.state.write().await;
        for i in state.entries.len() as u64..count {
            let entry = test_entry(i);
            state.tree.append_leaf_hash(entry.leaf_hash());
            state.entries.push(entry);
        }
    }
}

#[async_trait::async_trait]
impl UpstreamLog for FakeUpstream {
    async fn get_sth(&self) -> Result<SignedTreeHead, LogError> {
        let state = self.state.read().await;
        let size = state.tree.size();
        Ok(self
            .signer
            .sign_tree_head(size, 1_000 + size, state.tree.root()))
    }

    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<Entry>, LogError> {
        let state = self.state.read().await;
        let mut entries = state.entries[start as usize..end as usize].to_vec();
        if let Some(seq) = self.tamper_at {
            if seq >= start && seq < end {
                entries[(seq - start) as usize].leaf_input = b"tampered".to_vec();
            }
        }
        Ok(entries)
    }

    async fn get_inclusion_proof(
        &self,
        index: u64,
        tree_size: u64,
    ) -> Result<Vec<[u8; 32]>, LogError> {
        let state = self.state.read().await;
        Ok(state.tree.inclusion_proof(index, tree_size)?)
    }
}

fn mirror_config() -> FetcherConfig {
    FetcherConfig {
        parallelism: 3,
        window_size: 4,
        poll_interval: std::time::Duration::from_millis(50),
    }
}

#[tokio::test]
async fn test_mirror_catches_up_from_empty() {
    let signer = test_signer(9);
    let upstream = Arc::new(FakeUpstream::new(signer.clone(), 21));
    let db = Arc::new(EntryDb::in_memory());
    let fetcher = Fetcher::new(
        db.clone(),
        upstream,
        SthVerifier::new(signer.verifying_key()),
        mirror_config(),
    );

    assert_eq!(fetcher.catch_up_once().await.unwrap(), 21);
    assert_eq!(db.latest_contiguous_sequence(), 21);
    assert_eq!(db.read(20).unwrap(), Some(test_entry(20)));

    // The upstream head was adopted locally.
    let adopted = db.latest_tree_head().unwrap().unwrap();
    assert_eq!(adopted.tree_size, 21);
}

#[tokio::test]
async fn test_mirror_resumes_from_midpoint() {
    let signer = test_signer(9);
    let upstream = Arc::new(FakeUpstream::new(signer.clone(), 10));
    let db = Arc::new(EntryDb::in_memory());
    let fetcher = Fetcher::new(
        db.clone(),
        upstream.clone(),
        SthVerifier::new(signer.verifying_key()),
        mirror_config(),
    );

    assert_eq!(fetcher.catch_up_once().await.unwrap(), 10);
    assert_eq!(fetcher.catch_up_once().await.unwrap(), 0);

    upstream.grow_to(17).await;
    assert_eq!(fetcher.catch_up_once().await.unwrap(), 7);
    assert_eq!(db.latest_contiguous_sequence(), 17);
}

#[tokio::test]
async fn test_mirror_rejects_bad_upstream_signature() {
    let signer = test_signer(9);
    let imposter = test_signer(10);
    let upstream = Arc::new(FakeUpstream::new(imposter, 5));
    let db = Arc::new(EntryDb::in_memory());
    let fetcher = Fetcher::new(
        db.clone(),
        upstream,
        SthVerifier::new(signer.verifying_key()),
        mirror_config(),
    );

    assert!(matches!(
        fetcher.catch_up_once().await,
        Err(LogError::Validation(_))
    ));
    assert_eq!(db.latest_contiguous_sequence(), 0);
}

#[tokio::test]
async fn test_mirror_detects_tampered_window() {
    let signer = test_signer(9);
    // Tamper a boundary entry so the inclusion check trips.
    let upstream = Arc::new(FakeUpstream::new(signer.clone(), 12).tampered(3));
    let db = Arc::new(EntryDb::in_memory());
    let fetcher = Fetcher::new(
        db.clone(),
        upstream,
        SthVerifier::new(signer.verifying_key()),
        mirror_config(),
    );

    assert!(matches!(
        fetcher.catch_up_once().await,
        Err(LogError::Validation(_))
    ));
}

#[tokio::test]
async fn test_mirror_detects_non_boundary_tampering_at_root_check() {
    let signer = test_signer(9);
    // Sequence 1 is inside the first window of four, not a boundary;
    // only the pre-commit full-root recomputation can catch it.
    let upstream = Arc::new(FakeUpstream::new(signer.clone(), 12).tampered(1));
    let db = Arc::new(EntryDb::in_memory());
    let fetcher = Fetcher::new(
        db.clone(),
        upstream,
        SthVerifier::new(signer.verifying_key()),
        mirror_config(),
    );

    assert!(matches!(
        fetcher.catch_up_once().await,
        Err(LogError::Validation(_))
    ));
    // Nothing was committed: the database stays pristine.
    assert_eq!(db.latest_contiguous_sequence(), 0);
    assert!(db.latest_tree_head().unwrap().is_none());
}
