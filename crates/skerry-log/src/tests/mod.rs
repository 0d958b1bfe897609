//! Tests for the log engine.

mod fetcher_tests;

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use skerry_coord::{ConsistentStore, MemoryCoord, StrictStore};
use skerry_db::EntryDb;
use skerry_types::events::EventBus;
use skerry_types::{Entry, EntryType, PendingEntry};
use tokio::sync::watch;

use crate::{Sequencer, SequencerConfig, SthSigner};

/// Deterministic signer from a seed byte.
fn test_signer(seed: u8) -> Arc<SthSigner> {
    Arc::new(SthSigner::new(SigningKey::from_bytes(&[seed; 32])))
}

/// Deterministic entry for index `i`.
fn test_entry(i: u64) -> Entry {
    Entry {
        leaf_input: format!("cert-{i}").into_bytes(),
        extra_data: format!("chain-{i}").into_bytes(),
        timestamp_ms: 1000 + i,
        entry_type: EntryType::X509,
    }
}

/// A single-node engine fixture: entry DB, coordination store, and a
/// sequencer whose leadership signal the test controls.
struct Fixture {
    db: Arc<EntryDb>,
    store: ConsistentStore,
    sequencer: Sequencer,
    leadership: watch::Sender<bool>,
    bus: EventBus,
}

fn fixture() -> Fixture {
    let backend = MemoryCoord::new();
    let store = ConsistentStore::new(backend, "/skerry/test-log");
    let db = Arc::new(EntryDb::in_memory());
    let bus = EventBus::new();
    let (leadership, leadership_rx) = watch::channel(true);
    let strict = StrictStore::new(store.clone(), leadership_rx);
    let sequencer = Sequencer::new(
        db.clone(),
        strict,
        test_signer(7),
        SequencerConfig::default(),
        bus.clone(),
    );
    Fixture {
        db,
        store,
        sequencer,
        leadership,
        bus,
    }
}

/// Submit `entries` as pending with distinct promised timestamps.
async fn enqueue(store: &ConsistentStore, entries: &[Entry]) {
    for entry in entries {
        let pending = PendingEntry {
            entry: entry.clone(),
            sct_timestamp_ms: entry.timestamp_ms,
        };
        store.add_pending(&pending).await.unwrap();
    }
}
