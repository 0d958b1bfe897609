//! Storage backend for the entry database (Fjall disk or pure in-memory).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, RwLock};

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use skerry_types::{Entry, LeafHash, SignedTreeHead};
use tracing::{debug, info};

use crate::error::DbError;

type Result<T> = std::result::Result<T, DbError>;

/// Meta key for the latest locally-adopted signed tree head.
const META_TREE_HEAD: &[u8] = b"tree_head";
/// Meta key for the persisted contiguous watermark hint.
const META_CONTIGUOUS: &[u8] = b"contiguous";

/// Inner backend: either Fjall-backed (disk) or pure in-memory.
enum Backend {
    Fjall {
        #[allow(dead_code)]
        db: Database,
        by_seq: Keyspace,
        by_hash: Keyspace,
        staged: Keyspace,
        meta: Keyspace,
    },
    Memory(Box<MemoryBackend>),
}

/// Pure in-memory storage.
struct MemoryBackend {
    /// seq (BE bytes semantics preserved via u64 keys) → serialized Entry.
    by_seq: RwLock<BTreeMap<u64, Vec<u8>>>,
    /// leaf hash → sequence number.
    by_hash: RwLock<HashMap<[u8; 32], u64>>,
    /// leaf hash → serialized staged Entry.
    staged: RwLock<HashMap<[u8; 32], Vec<u8>>>,
    /// Serialized latest tree head, if any.
    tree_head: RwLock<Option<Vec<u8>>>,
}

/// Durable entry database: `by_seq` and `by_hash` write-once indices,
/// a staging area keyed by leaf hash, and the latest adopted tree head.
///
/// Single-writer (the sequencer or the mirror fetcher), many readers.
/// A successful [`EntryDb::assign_sequence`] survives restart; the
/// contiguous watermark is re-derived from `by_seq` on open.
pub struct EntryDb {
    backend: Backend,
    /// Cached largest `n` such that `[0, n)` is fully present. Guarded by
    /// a mutex because promotion both reads and advances it.
    contiguous: Mutex<u64>,
}

fn storage_err(e: impl std::fmt::Display) -> DbError {
    DbError::Storage(e.to_string())
}

impl EntryDb {
    /// Open a persistent database at the given path (Fjall backend).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open().map_err(storage_err)?;
        Self::init_fjall(db)
    }

    /// Open a temporary on-disk database (cleaned up on drop).
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(storage_err)?;
        let db = Database::builder(tmp.path())
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::init_fjall(db)
    }

    /// Create a pure in-memory database.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Box::new(MemoryBackend {
                by_seq: RwLock::new(BTreeMap::new()),
                by_hash: RwLock::new(HashMap::new()),
                staged: RwLock::new(HashMap::new()),
                tree_head: RwLock::new(None),
            })),
            contiguous: Mutex::new(0),
        }
    }

    fn init_fjall(db: Database) -> Result<Self> {
        let by_seq = db
            .keyspace("ct_by_seq", KeyspaceCreateOptions::default)
            .map_err(storage_err)?;
        let by_hash = db
            .keyspace("ct_by_hash", KeyspaceCreateOptions::default)
            .map_err(storage_err)?;
        let staged = db
            .keyspace("ct_staged", KeyspaceCreateOptions::default)
            .map_err(storage_err)?;
        let meta = db
            .keyspace("ct_meta", KeyspaceCreateOptions::default)
            .map_err(storage_err)?;

        let db = Self {
            backend: Backend::Fjall {
                db,
                by_seq,
                by_hash,
                staged,
                meta,
            },
            contiguous: Mutex::new(0),
        };
        db.recover_contiguous()?;
        db.check_tree_head_invariant()?;
        Ok(db)
    }

    /// Re-derive the contiguous watermark: start from the persisted hint
    /// and walk forward while entries are present.
    fn recover_contiguous(&self) -> Result<()> {
        let hint = match self.get_meta(META_CONTIGUOUS)? {
            Some(bytes) => postcard::from_bytes::<u64>(&bytes)?,
            None => 0,
        };
        // The hint may be stale if the process died between an insert and
        // the hint update; never trust it past a missing entry.
        let mut n = 0u64;
        while self.get_by_seq(n)?.is_some() {
            n += 1;
        }
        if n < hint {
            return Err(DbError::Corrupt(format!(
                "contiguous hint {hint} exceeds actual contiguous prefix {n}"
            )));
        }
        *self.contiguous.lock().expect("contiguous lock poisoned") = n;
        debug!(contiguous = n, "recovered contiguous watermark");
        Ok(())
    }

    /// A stored tree head must never cover entries this node lacks.
    fn check_tree_head_invariant(&self) -> Result<()> {
        if let Some(sth) = self.latest_tree_head()? {
            let contiguous = self.latest_contiguous_sequence();
            if sth.tree_size > contiguous {
                return Err(DbError::Corrupt(format!(
                    "stored tree head covers {} entries but only {} are present",
                    sth.tree_size, contiguous
                )));
            }
        }
        Ok(())
    }

    // ----- Staging -----

    /// Stage an accepted entry under its leaf hash. Idempotent.
    pub fn put_staged(&self, entry: &Entry) -> Result<()> {
        let hash = entry.leaf_hash();
        let bytes = postcard::to_allocvec(entry)?;
        match &self.backend {
            Backend::Fjall { staged, .. } => {
                staged.insert(hash.as_bytes(), bytes).map_err(storage_err)?;
            }
            Backend::Memory(m) => {
                m.staged.write().unwrap().insert(*hash.as_bytes(), bytes);
            }
        }
        Ok(())
    }

    /// Retrieve a staged entry by leaf hash.
    pub fn staged(&self, leaf_hash: &LeafHash) -> Result<Option<Entry>> {
        let bytes = match &self.backend {
            Backend::Fjall { staged, .. } => staged
                .get(leaf_hash.as_bytes())
                .map_err(storage_err)?
                .map(|v| v.to_vec()),
            Backend::Memory(m) => m.staged.read().unwrap().get(leaf_hash.as_bytes()).cloned(),
        };
        match bytes {
            Some(b) => Ok(Some(postcard::from_bytes(&b)?)),
            None => Ok(None),
        }
    }

    // ----- Promotion -----

    /// Atomically promote a staged entry to sequence `seq`.
    ///
    /// Idempotent when `(leaf_hash, seq)` is already bound; fails with
    /// [`DbError::SequenceConflict`] or [`DbError::HashConflict`] when
    /// either side is bound elsewhere. On success the mapping is durable
    /// and the staged copy is dropped.
    pub fn assign_sequence(&self, leaf_hash: &LeafHash, seq: u64) -> Result<()> {
        let mut contiguous = self.contiguous.lock().expect("contiguous lock poisoned");

        if let Some(existing_seq) = self.lookup_by_hash(leaf_hash)? {
            if existing_seq == seq {
                return Ok(());
            }
            return Err(DbError::HashConflict {
                leaf_hash: *leaf_hash,
                existing_seq,
            });
        }
        if let Some(existing) = self.get_by_seq(seq)? {
            let existing: Entry = postcard::from_bytes(&existing)?;
            if existing.leaf_hash() != *leaf_hash {
                return Err(DbError::SequenceConflict { seq });
            }
            return Ok(());
        }

        let entry = self
            .staged(leaf_hash)?
            .ok_or(DbError::StagedMissing(*leaf_hash))?;
        let bytes = postcard::to_allocvec(&entry)?;

        match &self.backend {
            Backend::Fjall {
                by_seq,
                by_hash,
                staged,
                ..
            } => {
                by_seq
                    .insert(seq.to_be_bytes(), bytes)
                    .map_err(storage_err)?;
                by_hash
                    .insert(leaf_hash.as_bytes(), seq.to_be_bytes())
                    .map_err(storage_err)?;
                staged.remove(leaf_hash.as_bytes()).map_err(storage_err)?;
            }
            Backend::Memory(m) => {
                m.by_seq.write().unwrap().insert(seq, bytes);
                m.by_hash.write().unwrap().insert(*leaf_hash.as_bytes(), seq);
                m.staged.write().unwrap().remove(leaf_hash.as_bytes());
            }
        }

        // Advance the watermark across the newly-filled prefix.
        if seq == *contiguous {
            let mut n = seq + 1;
            while self.get_by_seq(n)?.is_some() {
                n += 1;
            }
            *contiguous = n;
            self.put_meta(META_CONTIGUOUS, &postcard::to_allocvec(&n)?)?;
        }
        Ok(())
    }

    // ----- Reads -----

    /// Sequence number for a leaf hash, if the entry has been sequenced.
    pub fn lookup_by_hash(&self, leaf_hash: &LeafHash) -> Result<Option<u64>> {
        match &self.backend {
            Backend::Fjall { by_hash, .. } => {
                let bytes = by_hash.get(leaf_hash.as_bytes()).map_err(storage_err)?;
                Ok(bytes.map(|v| {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(&v);
                    u64::from_be_bytes(buf)
                }))
            }
            Backend::Memory(m) => Ok(m.by_hash.read().unwrap().get(leaf_hash.as_bytes()).copied()),
        }
    }

    /// Entry at a sequence number.
    pub fn read(&self, seq: u64) -> Result<Option<Entry>> {
        match self.get_by_seq(seq)? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Entries in `[start, end)`, in order. Fails on a gap — ranges below
    /// the contiguous watermark never have gaps.
    pub fn read_range(&self, start: u64, end: u64) -> Result<Vec<Entry>> {
        let mut out = Vec::with_capacity((end.saturating_sub(start)) as usize);
        for seq in start..end {
            match self.read(seq)? {
                Some(entry) => out.push(entry),
                None => {
                    return Err(DbError::Corrupt(format!(
                        "gap at sequence {seq} inside requested range [{start}, {end})"
                    )))
                }
            }
        }
        Ok(out)
    }

    /// Largest `n` such that every entry in `[0, n)` is present locally.
    pub fn latest_contiguous_sequence(&self) -> u64 {
        *self.contiguous.lock().expect("contiguous lock poisoned")
    }

    // ----- Tree head -----

    /// Store the latest signed tree head this node has signed or adopted.
    ///
    /// The head must be covered by local entries and must not regress.
    pub fn store_tree_head(&self, sth: &SignedTreeHead) -> Result<()> {
        let contiguous = self.latest_contiguous_sequence();
        if sth.tree_size > contiguous {
            return Err(DbError::Corrupt(format!(
                "refusing tree head covering {} entries with only {} present",
                sth.tree_size, contiguous
            )));
        }
        if let Some(existing) = self.latest_tree_head()? {
            if sth.tree_size < existing.tree_size {
                debug!(
                    new = sth.tree_size,
                    existing = existing.tree_size,
                    "ignoring tree head older than the stored one"
                );
                return Ok(());
            }
        }
        let bytes = postcard::to_allocvec(sth)?;
        match &self.backend {
            Backend::Fjall { meta, .. } => {
                meta.insert(META_TREE_HEAD, bytes).map_err(storage_err)?;
            }
            Backend::Memory(m) => {
                *m.tree_head.write().unwrap() = Some(bytes);
            }
        }
        info!(
            tree_size = sth.tree_size,
            timestamp = sth.timestamp_ms,
            "stored tree head"
        );
        Ok(())
    }

    /// The most recent tree head stored on this node, if any.
    pub fn latest_tree_head(&self) -> Result<Option<SignedTreeHead>> {
        let bytes = match &self.backend {
            Backend::Fjall { meta, .. } => meta
                .get(META_TREE_HEAD)
                .map_err(storage_err)?
                .map(|v| v.to_vec()),
            Backend::Memory(m) => m.tree_head.read().unwrap().clone(),
        };
        match bytes {
            Some(b) => Ok(Some(postcard::from_bytes(&b)?)),
            None => Ok(None),
        }
    }

    // ----- Internal raw access -----

    fn get_by_seq(&self, seq: u64) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Fjall { by_seq, .. } => Ok(by_seq
                .get(seq.to_be_bytes())
                .map_err(storage_err)?
                .map(|v| v.to_vec())),
            Backend::Memory(m) => Ok(m.by_seq.read().unwrap().get(&seq).cloned()),
        }
    }

    fn get_meta(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Fjall { meta, .. } => {
                Ok(meta.get(key).map_err(storage_err)?.map(|v| v.to_vec()))
            }
            Backend::Memory(_) => Ok(None),
        }
    }

    fn put_meta(&self, key: &[u8], value: &[u8]) -> Result<()> {
        match &self.backend {
            Backend::Fjall { meta, .. } => {
                meta.insert(key, value).map_err(storage_err)?;
            }
            Backend::Memory(_) => {}
        }
        Ok(())
    }
}
