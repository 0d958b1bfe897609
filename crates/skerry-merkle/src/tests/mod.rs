//! Tests for the Merkle crate.


use skerry_types::LeafHash;

use crate::MerkleLog;

/// Deterministic leaf input for index `i`.
fn leaf_input(i: u64) -> Vec<u8> {
    format!("leaf-{i}").into_bytes()
}

/// Build a tree with `n` deterministic leaves.
fn build_log(n: u64) -> MerkleLog {
    let mut log = MerkleLog::new();
    for i in 0..n {
        log.append(&leaf_input(i));
    }
    log
}

/// Leaf hash of the deterministic leaf at index `i`.
fn leaf(i: u64) -> LeafHash {
    LeafHash::compute(&leaf_input(i))
}
