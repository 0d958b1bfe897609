//! SCT issuance: the entry point the frontend calls for
//! `add-chain` / `add-pre-chain`.

use std::sync::Arc;

use skerry_coord::{AddOutcome, ConsistentStore};
use skerry_db::EntryDb;
use skerry_types::{now_millis, Entry, EntryType, PendingEntry, Sct};
use tracing::debug;

use crate::error::LogError;
use crate::signer::SthSigner;

type Result<T> = std::result::Result<T, LogError>;

/// Maximum accepted leaf input size. Matches the 24-bit length prefix of
/// the TLS `signed_entry` vector.
const MAX_LEAF_INPUT: usize = (1 << 24) - 1;

/// Accepts submissions and issues SCTs.
///
/// Issuance is idempotent on the leaf hash: resubmitting a certificate —
/// concurrently from several frontends or long after it was sequenced —
/// returns an SCT with the originally promised timestamp, byte-identical
/// because ed25519 signing is deterministic.
pub struct Submitter {
    db: Arc<EntryDb>,
    store: ConsistentStore,
    signer: Arc<SthSigner>,
}

impl Submitter {
    /// Create a submission handler.
    pub fn new(db: Arc<EntryDb>, store: ConsistentStore, signer: Arc<SthSigner>) -> Self {
        Self { db, store, signer }
    }

    /// Accept an entry and return its SCT.
    pub async fn submit(
        &self,
        leaf_input: Vec<u8>,
        extra_data: Vec<u8>,
        entry_type: EntryType,
    ) -> Result<Sct> {
        if leaf_input.is_empty() {
            return Err(LogError::Validation("empty leaf input".into()));
        }
        if leaf_input.len() > MAX_LEAF_INPUT {
            return Err(LogError::Validation(format!(
                "leaf input of {} bytes exceeds the maximum of {MAX_LEAF_INPUT}",
                leaf_input.len()
            )));
        }

        let now = now_millis();
        let entry = Entry {
            leaf_input,
            extra_data,
            timestamp_ms: now,
            entry_type,
        };
        let leaf_hash = entry.leaf_hash();

        // Already sequenced (and possibly garbage-collected from the
        // pending namespace): re-issue against the original timestamp.
        if let Some(seq) = self.db.lookup_by_hash(&leaf_hash)? {
            let sequenced = self
                .db
                .read(seq)?
                .ok_or_else(|| LogError::Fatal(format!("hash index points at missing {seq}")))?;
            debug!(%leaf_hash, seq, "resubmission of a sequenced entry");
            return Ok(self.signer.sign_sct(&sequenced, sequenced.timestamp_ms, vec![]));
        }

        let pending = PendingEntry {
            entry: entry.clone(),
            sct_timestamp_ms: now,
        };
        let timestamp = match self.store.add_pending(&pending).await? {
            AddOutcome::Created => now,
            AddOutcome::AlreadyExists { sct_timestamp_ms } => {
                debug!(%leaf_hash, "duplicate submission, reusing promised timestamp");
                sct_timestamp_ms
            }
        };

        let mut signed_entry = entry;
        signed_entry.timestamp_ms = timestamp;
        Ok(self.signer.sign_sct(&signed_entry, timestamp, vec![]))
    }
}
