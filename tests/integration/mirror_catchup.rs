//! Mirror mode: a read-only follower reproduces the log bit-for-bit.

use std::sync::Arc;
use std::time::Duration;

use skerry_db::EntryDb;
use skerry_log::{Fetcher, FetcherConfig, SthVerifier};
use skerry_merkle::{verify, MerkleLog};
use skerry_tests::{cert_bytes, IntegrationCluster, PeerUpstream};
use skerry_types::EntryType;

#[tokio::test(flavor = "multi_thread")]
async fn mirror_reproduces_log_and_verifies_heads() {
    let cluster = IntegrationCluster::start(1, 1).await;
    cluster.wait_for_leader(Duration::from_secs(5)).await;

    let submitter = cluster.submitter(0);
    for i in 0..20u64 {
        submitter
            .submit(cert_bytes(i), vec![], EntryType::X509)
            .await
            .unwrap();
    }
    let first_head = cluster.wait_for_tree_size(20, Duration::from_secs(10)).await;

    // A mirror with an empty database pulls the whole range.
    let mirror_db = Arc::new(EntryDb::in_memory());
    let fetcher = Fetcher::new(
        mirror_db.clone(),
        Arc::new(PeerUpstream::new(cluster.store.clone(), cluster.peer_dbs())),
        SthVerifier::new(cluster.signer.verifying_key()),
        FetcherConfig {
            parallelism: 3,
            window_size: 6,
            poll_interval: Duration::from_millis(50),
        },
    );
    assert_eq!(fetcher.catch_up_once().await.unwrap(), 20);
    assert_eq!(mirror_db.latest_contiguous_sequence(), 20);

    // The mirror republishes the upstream head, never its own.
    let adopted = mirror_db.latest_tree_head().unwrap().unwrap();
    assert_eq!(adopted, first_head);

    // The log grows; the mirror follows, and the two heads are
    // provably consistent.
    for i in 20..27u64 {
        submitter
            .submit(cert_bytes(i), vec![], EntryType::X509)
            .await
            .unwrap();
    }
    let second_head = cluster.wait_for_tree_size(27, Duration::from_secs(10)).await;
    assert_eq!(fetcher.catch_up_once().await.unwrap(), 7);

    let entries = mirror_db.read_range(0, 27).unwrap();
    let log = MerkleLog::from_leaf_hashes(entries.iter().map(|e| e.leaf_hash()));
    assert_eq!(log.root(), second_head.root_hash);

    let proof = log.consistency_proof(20, 27).unwrap();
    verify::verify_consistency(
        20,
        27,
        &proof,
        &first_head.root_hash,
        &second_head.root_hash,
    )
    .unwrap();

    cluster.stop_all().await;
}
