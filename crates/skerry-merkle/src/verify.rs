//! Proof verification: recompute roots from audit paths.
//!
//! These functions hold no tree state. Auditors, the mirror fetcher, and
//! the test suite use them to check what the tree side produced.

use skerry_types::LeafHash;

use crate::error::MerkleError;
use crate::{node_hash, EMPTY_ROOT};

type Result<T> = std::result::Result<T, MerkleError>;

/// Verify an inclusion proof (RFC 6962 §2.1.3): recompute the root at
/// `tree_size` from `leaf_hash` at `leaf_index` plus the audit path, and
/// compare with `root`.
pub fn verify_inclusion(
    leaf_hash: &LeafHash,
    leaf_index: u64,
    tree_size: u64,
    proof: &[[u8; 32]],
    root: &[u8; 32],
) -> Result<()> {
    if leaf_index >= tree_size {
        return Err(MerkleError::LeafOutOfRange {
            index: leaf_index,
            tree_size,
        });
    }

    let mut fn_ = leaf_index;
    let mut sn = tree_size - 1;
    let mut hash = *leaf_hash.as_bytes();

    for sibling in proof {
        if sn == 0 {
            return Err(MerkleError::MalformedProof("proof longer than path"));
        }
        if fn_ & 1 == 1 || fn_ == sn {
            hash = node_hash(sibling, &hash);
            // Skip levels where this node has no right sibling.
            while fn_ & 1 == 0 {
                if fn_ == 0 {
                    break;
                }
                fn_ >>= 1;
                sn >>= 1;
            }
        } else {
            hash = node_hash(&hash, sibling);
        }
        fn_ >>= 1;
        sn >>= 1;
    }

    if sn != 0 {
        return Err(MerkleError::MalformedProof("proof shorter than path"));
    }
    if hash != *root {
        return Err(MerkleError::ProofMismatch);
    }
    Ok(())
}

/// Verify a consistency proof (RFC 6962 §2.1.4): check that the tree at
/// `new_size` with root `new_root` is an append-only extension of the
/// tree at `old_size` with root `old_root`.
pub fn verify_consistency(
    old_size: u64,
    new_size: u64,
    proof: &[[u8; 32]],
    old_root: &[u8; 32],
    new_root: &[u8; 32],
) -> Result<()> {
    if old_size > new_size {
        return Err(MerkleError::InvalidRange { old_size, new_size });
    }
    if old_size == new_size {
        if !proof.is_empty() {
            return Err(MerkleError::MalformedProof("non-empty proof for equal sizes"));
        }
        if old_root != new_root {
            return Err(MerkleError::ProofMismatch);
        }
        return Ok(());
    }
    if old_size == 0 {
        // Every tree extends the empty tree.
        if !proof.is_empty() {
            return Err(MerkleError::MalformedProof("non-empty proof from empty tree"));
        }
        if *old_root != EMPTY_ROOT {
            return Err(MerkleError::ProofMismatch);
        }
        return Ok(());
    }

    let mut fn_ = old_size - 1;
    let mut sn = new_size - 1;
    // Shared complete subtrees on the right edge of the old tree need no
    // proof hashes; skip those levels up front.
    while fn_ & 1 == 1 {
        fn_ >>= 1;
        sn >>= 1;
    }

    let mut iter = proof.iter();
    let (mut old_acc, mut new_acc) = if fn_ == 0 {
        // old_size is a power of two: the old root itself is the seed.
        (*old_root, *old_root)
    } else {
        match iter.next() {
            Some(seed) => (*seed, *seed),
            None => return Err(MerkleError::MalformedProof("empty consistency proof")),
        }
    };

    for sibling in iter {
        if sn == 0 {
            return Err(MerkleError::MalformedProof("proof longer than path"));
        }
        if fn_ & 1 == 1 || fn_ == sn {
            old_acc = node_hash(sibling, &old_acc);
            new_acc = node_hash(sibling, &new_acc);
            while fn_ & 1 == 0 {
                if fn_ == 0 {
                    break;
                }
                fn_ >>= 1;
                sn >>= 1;
            }
        } else {
            new_acc = node_hash(&new_acc, sibling);
        }
        fn_ >>= 1;
        sn >>= 1;
    }

    if sn != 0 {
        return Err(MerkleError::MalformedProof("proof shorter than path"));
    }
    if old_acc != *old_root || new_acc != *new_root {
        return Err(MerkleError::ProofMismatch);
    }
    Ok(())
}
