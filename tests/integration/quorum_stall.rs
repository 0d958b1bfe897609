//! Quorum gating: the serving head only advances over replicated
//! entries, stalls below quorum, never regresses, and resumes when the
//! cluster heals.

use std::time::Duration;

use skerry_tests::{cert_bytes, wait_until, IntegrationCluster};
use skerry_types::EntryType;

#[tokio::test(flavor = "multi_thread")]
async fn serving_head_stalls_below_quorum_and_recovers() {
    let mut cluster = IntegrationCluster::start(3, 2).await;
    cluster.wait_for_leader(Duration::from_secs(5)).await;

    // Phase 1: healthy cluster serves three entries.
    let submitter = cluster.submitter(0);
    for i in 0..3u64 {
        submitter
            .submit(cert_bytes(i), vec![], EntryType::X509)
            .await
            .unwrap();
    }
    let healthy = cluster
        .wait_for_serving_size(3, Duration::from_secs(10))
        .await;

    // Phase 2: take out every non-leader; the survivor alone is below
    // quorum.
    let leader = cluster.leader().expect("leader");
    for (i, node) in cluster.nodes.iter().enumerate() {
        if i != leader {
            node.kill();
        }
    }
    // Let the dead nodes' heartbeat leases lapse.
    tokio::time::sleep(Duration::from_millis(900)).await;

    for i in 3..6u64 {
        submitter
            .submit(cert_bytes(i), vec![], EntryType::X509)
            .await
            .unwrap();
    }
    // The leader keeps sequencing and publishing...
    cluster.wait_for_tree_size(6, Duration::from_secs(10)).await;

    // ...but the serving head cannot move: a single holder is below the
    // quorum of two. Sample for a while; it must neither advance nor
    // regress.
    for _ in 0..10 {
        let serving = cluster.store.serving_sth().await.unwrap().unwrap();
        assert_eq!(
            serving.tree_size, healthy.tree_size,
            "serving head moved without quorum"
        );
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    // Phase 3: heal by bringing in a fresh node. It replicates via the
    // fetcher and the serving head catches up.
    cluster.spawn_node(9);
    let healed = cluster
        .wait_for_serving_size(6, Duration::from_secs(15))
        .await;
    assert!(healed.tree_size >= 6);
    assert!(healed.tree_size >= healthy.tree_size, "serving regressed");

    let newcomer = cluster.nodes.last().unwrap();
    wait_until(Duration::from_secs(10), || async {
        (newcomer.db.latest_contiguous_sequence() >= 6).then_some(())
    })
    .await
    .expect("newcomer catches up via fetch");

    cluster.stop_all().await;
}
