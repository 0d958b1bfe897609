//! Leader failover: a successor finishes the dead leader's work with no
//! duplicate or skipped sequence numbers.

use std::time::Duration;

use skerry_coord::StrictStore;
use skerry_tests::{cert_bytes, wait_until, IntegrationCluster};
use skerry_types::{now_millis, Entry, EntryType, PendingEntry};
use tokio::sync::watch;

#[tokio::test(flavor = "multi_thread")]
async fn successor_completes_interrupted_batch() {
    // Model the moment a leader died mid-batch: ten entries pending,
    // three of them already holding reservations in the sequence
    // mapping, nothing committed to any database, no head published.
    let cluster = {
        let backend = skerry_coord::MemoryCoord::new();
        let store = skerry_coord::ConsistentStore::new(backend.clone(), "/skerry/itest");

        for i in 0..10u64 {
            let entry = Entry {
                leaf_input: cert_bytes(i),
                extra_data: vec![],
                timestamp_ms: 1000 + i,
                entry_type: EntryType::X509,
            };
            store
                .add_pending(&PendingEntry {
                    sct_timestamp_ms: entry.timestamp_ms,
                    entry,
                })
                .await
                .unwrap();
        }

        // The dead leader's reservations, in promised order.
        let (_hold, rx) = watch::channel(true);
        let dead_leader = StrictStore::new(store.clone(), rx);
        for i in 0..3u64 {
            let hash = skerry_types::LeafHash::compute(&cert_bytes(i));
            dead_leader.assign_sequence_number(&hash, i).await.unwrap();
        }
        drop(dead_leader);

        IntegrationCluster::start_with_backend(backend, 2, 1).await
    };

    // A leader is elected and, within the merge delay, sequences all
    // ten entries exactly once.
    cluster.wait_for_leader(Duration::from_secs(5)).await;
    let sth = cluster.wait_for_tree_size(10, Duration::from_secs(10)).await;
    assert_eq!(sth.tree_size, 10);

    let leader = cluster.leader().expect("leader");
    let db = &cluster.nodes[leader].db;
    assert_eq!(db.latest_contiguous_sequence(), 10);

    // Reserved entries kept their sequences; no hash appears twice.
    for i in 0..3u64 {
        let hash = skerry_types::LeafHash::compute(&cert_bytes(i));
        assert_eq!(db.lookup_by_hash(&hash).unwrap(), Some(i));
    }
    let mut seen = std::collections::HashSet::new();
    for seq in 0..10u64 {
        let entry = db.read(seq).unwrap().expect("dense prefix");
        assert!(seen.insert(entry.leaf_hash()), "duplicate at {seq}");
    }

    cluster.stop_all().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn killed_leader_is_replaced_and_log_continues() {
    let cluster = IntegrationCluster::start(2, 1).await;
    let first = cluster.wait_for_leader(Duration::from_secs(5)).await;

    let submitter = cluster.submitter(0);
    for i in 0..4u64 {
        submitter
            .submit(cert_bytes(i), vec![], EntryType::X509)
            .await
            .unwrap();
    }
    cluster.wait_for_tree_size(4, Duration::from_secs(10)).await;

    // Let the survivor replicate before the crash takes the only copy
    // holder out.
    let survivor = 1 - first;
    wait_until(Duration::from_secs(10), || async {
        (cluster.nodes[survivor].db.latest_contiguous_sequence() >= 4).then_some(())
    })
    .await
    .expect("survivor replicates before the crash");

    cluster.nodes[first].kill();

    // The survivor takes the lease once it lapses.
    wait_until(Duration::from_secs(10), || async {
        cluster.nodes[survivor].is_leader().then_some(())
    })
    .await
    .expect("survivor elected");

    // And the log keeps accepting and sequencing.
    for i in 4..7u64 {
        submitter
            .submit(cert_bytes(i), vec![], EntryType::X509)
            .await
            .unwrap();
    }
    let sth = cluster.wait_for_tree_size(7, Duration::from_secs(10)).await;
    assert_eq!(sth.tree_size, 7);
    assert!(sth.timestamp_ms <= now_millis());

    cluster.stop_all().await;
}
