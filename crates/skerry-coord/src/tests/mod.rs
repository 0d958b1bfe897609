//! Tests for the coordination crate.


use std::sync::Arc;

use skerry_types::{Entry, EntryType, PendingEntry};

use crate::{ConsistentStore, MemoryCoord};

/// A store rooted at a test log over a fresh in-memory backend.
fn test_store() -> (Arc<MemoryCoord>, ConsistentStore) {
    let backend = MemoryCoord::new();
    let store = ConsistentStore::new(backend.clone(), "/skerry/test-log");
    (backend, store)
}

/// Deterministic pending entry for index `i`.
fn pending(i: u64) -> PendingEntry {
    PendingEntry {
        entry: Entry {
            leaf_input: format!("cert-{i}").into_bytes(),
            extra_data: vec![],
            timestamp_ms: 1000 + i,
            entry_type: EntryType::X509,
        },
        sct_timestamp_ms: 1000 + i,
    }
}
