//! Full dense Merkle tree with memoised inner nodes.

use std::collections::HashMap;
use std::sync::RwLock;

use skerry_types::LeafHash;

use crate::error::MerkleError;
use crate::{node_hash, split_point, EMPTY_ROOT};

type Result<T> = std::result::Result<T, MerkleError>;

/// Append-only RFC 6962 hash tree over a dense leaf sequence.
///
/// Leaves are stored by their leaf hash, indexed by sequence number.
/// Inner-node hashes of full, aligned subtrees are memoised by
/// `(level, index)` so that repeated proof generation over the same tree
/// costs O(log n) hashing instead of O(n).
///
/// All read operations accept a *past* tree size: the tree at any size
/// `s <= size()` is a prefix of the current tree and its root, inclusion
/// paths, and consistency paths remain computable forever.
pub struct MerkleLog {
    /// Leaf hashes, dense, indexed by sequence number.
    leaves: Vec<[u8; 32]>,
    /// Memoised full-subtree roots keyed by (level, index): the subtree
    /// of height `level` covering leaves `[index << level, (index+1) << level)`.
    nodes: RwLock<HashMap<(u32, u64), [u8; 32]>>,
}

impl MerkleLog {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            leaves: Vec::new(),
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Build a tree from an ordered sequence of leaf hashes.
    pub fn from_leaf_hashes<I: IntoIterator<Item = LeafHash>>(hashes: I) -> Self {
        Self {
            leaves: hashes.into_iter().map(|h| *h.as_bytes()).collect(),
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Number of leaves currently in the tree.
    pub fn size(&self) -> u64 {
        self.leaves.len() as u64
    }

    /// Hash and append a raw leaf input. Returns the leaf hash and the
    /// tree size after the append.
    pub fn append(&mut self, leaf_input: &[u8]) -> (LeafHash, u64) {
        let hash = LeafHash::compute(leaf_input);
        let size = self.append_leaf_hash(hash);
        (hash, size)
    }

    /// Append an already-computed leaf hash. Returns the new tree size.
    pub fn append_leaf_hash(&mut self, hash: LeafHash) -> u64 {
        self.leaves.push(*hash.as_bytes());
        self.leaves.len() as u64
    }

    /// Leaf hash at a sequence number, if present.
    pub fn leaf_hash(&self, index: u64) -> Option<LeafHash> {
        self.leaves.get(index as usize).map(|h| LeafHash::from(*h))
    }

    /// Root of the tree at `size` (any past size is valid).
    pub fn root_at(&self, size: u64) -> Result<[u8; 32]> {
        if size > self.size() {
            return Err(MerkleError::SizeBeyondLog {
                size,
                log_size: self.size(),
            });
        }
        if size == 0 {
            return Ok(EMPTY_ROOT);
        }
        Ok(self.range_root(0, size))
    }

    /// Root of the current tree.
    pub fn root(&self) -> [u8; 32] {
        self.root_at(self.size()).expect("current size is in range")
    }

    /// Inclusion proof for the leaf at `index` in the tree at `tree_size`
    /// (RFC 6962 §2.1.1), ordered from the leaf towards the root.
    pub fn inclusion_proof(&self, index: u64, tree_size: u64) -> Result<Vec<[u8; 32]>> {
        if tree_size > self.size() {
            return Err(MerkleError::SizeBeyondLog {
                size: tree_size,
                log_size: self.size(),
            });
        }
        if index >= tree_size {
            return Err(MerkleError::LeafOutOfRange { index, tree_size });
        }

        let mut path = Vec::new();
        self.inclusion_path(index, 0, tree_size, &mut path);
        Ok(path)
    }

    /// Consistency proof between the trees at `old_size` and `new_size`
    /// (RFC 6962 §2.1.2).
    ///
    /// `old_size == 0` and `old_size == new_size` both yield the empty
    /// proof; `old_size > new_size` is an invalid range.
    pub fn consistency_proof(&self, old_size: u64, new_size: u64) -> Result<Vec<[u8; 32]>> {
        if old_size > new_size {
            return Err(MerkleError::InvalidRange { old_size, new_size });
        }
        if new_size > self.size() {
            return Err(MerkleError::SizeBeyondLog {
                size: new_size,
                log_size: self.size(),
            });
        }
        if old_size == 0 || old_size == new_size {
            return Ok(Vec::new());
        }

        let mut path = Vec::new();
        self.consistency_subproof(old_size, 0, new_size, true, &mut path);
        Ok(path)
    }

    // -- internal --

    /// `PATH(m, D[start..start+size])`: audit path for the `m`-th leaf of
    /// the subtree, appended to `out` leaf-to-root.
    fn inclusion_path(&self, m: u64, start: u64, size: u64, out: &mut Vec<[u8; 32]>) {
        if size <= 1 {
            return;
        }
        let k = split_point(size);
        if m < k {
            self.inclusion_path(m, start, k, out);
            out.push(self.range_root(start + k, size - k));
        } else {
            self.inclusion_path(m - k, start + k, size - k, out);
            out.push(self.range_root(start, k));
        }
    }

    /// `SUBPROOF(m, D[start..start+size], complete)` per RFC 6962 §2.1.2.
    fn consistency_subproof(
        &self,
        m: u64,
        start: u64,
        size: u64,
        complete: bool,
        out: &mut Vec<[u8; 32]>,
    ) {
        if m == size {
            // The old tree is this entire subtree. If it was a shared
            // prefix all along, the verifier already has its hash.
            if !complete {
                out.push(self.range_root(start, size));
            }
            return;
        }
        let k = split_point(size);
        if m <= k {
            self.consistency_subproof(m, start, k, complete, out);
            out.push(self.range_root(start + k, size - k));
        } else {
            self.consistency_subproof(m - k, start + k, size - k, false, out);
            out.push(self.range_root(start, k));
        }
    }

    /// `MTH(D[start..start+size])` with memoisation of full aligned subtrees.
    fn range_root(&self, start: u64, size: u64) -> [u8; 32] {
        debug_assert!(size >= 1);
        if size == 1 {
            return self.leaves[start as usize];
        }

        let full_aligned = size.is_power_of_two() && start % size == 0;
        if full_aligned {
            let key = (size.trailing_zeros(), start / size);
            if let Some(hash) = self.nodes.read().expect("node cache poisoned").get(&key) {
                return *hash;
            }
            let k = size / 2;
            let hash = node_hash(&self.range_root(start, k), &self.range_root(start + k, k));
            self.nodes
                .write()
                .expect("node cache poisoned")
                .insert(key, hash);
            return hash;
        }

        let k = split_point(size);
        node_hash(
            &self.range_root(start, k),
            &self.range_root(start + k, size - k),
        )
    }
}

impl Default for MerkleLog {
    fn default() -> Self {
        Self::new()
    }
}
