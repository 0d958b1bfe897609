//! Duplicate submissions: one sequence number, one promised timestamp.

use std::time::Duration;

use skerry_tests::{cert_bytes, IntegrationCluster};
use skerry_types::{EntryType, LeafHash};

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_duplicates_share_one_sct() {
    let cluster = IntegrationCluster::start(2, 1).await;
    cluster.wait_for_leader(Duration::from_secs(5)).await;

    // The same certificate races in from two frontends at once.
    let a = cluster.submitter(0);
    let b = cluster.submitter(1);
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let a = cluster.submitter(0);
        tasks.spawn(async move { a.submit(cert_bytes(0), vec![], EntryType::X509).await });
        let b = cluster.submitter(1);
        tasks.spawn(async move { b.submit(cert_bytes(0), vec![], EntryType::X509).await });
    }

    let mut scts = Vec::new();
    while let Some(result) = tasks.join_next().await {
        scts.push(result.unwrap().unwrap());
    }
    // Exactly one add_pending won; every caller sees the same promise,
    // down to the signature bytes.
    for sct in &scts {
        assert_eq!(sct, &scts[0]);
    }

    // Exactly one sequence number is ever assigned.
    cluster.wait_for_tree_size(1, Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let sth = cluster.store.latest_sth().await.unwrap().unwrap();
    assert_eq!(sth.tree_size, 1, "duplicate was sequenced twice");

    let hash = LeafHash::compute(&cert_bytes(0));
    let leader = cluster.leader().expect("leader");
    assert_eq!(
        cluster.nodes[leader].db.lookup_by_hash(&hash).unwrap(),
        Some(0)
    );

    // Late resubmission, long after sequencing and GC: once a node has
    // the entry replicated locally it answers from its own index with
    // the same SCT.
    skerry_tests::wait_until(Duration::from_secs(10), || async {
        (cluster
            .nodes
            .iter()
            .all(|n| n.db.latest_contiguous_sequence() >= 1))
        .then_some(())
    })
    .await
    .expect("both nodes replicate the entry");

    let late = a.submit(cert_bytes(0), vec![], EntryType::X509).await.unwrap();
    assert_eq!(late, scts[0]);
    let late = b.submit(cert_bytes(0), vec![], EntryType::X509).await.unwrap();
    assert_eq!(late, scts[0]);

    cluster.stop_all().await;
}
