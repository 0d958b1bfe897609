//! Error types for the Merkle crate.

/// Errors that can occur during tree operations and proof verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MerkleError {
    /// A requested leaf index lies outside the requested tree size.
    #[error("leaf index {index} out of range for tree size {tree_size}")]
    LeafOutOfRange { index: u64, tree_size: u64 },

    /// A requested tree size exceeds the number of appended leaves.
    #[error("tree size {size} exceeds log size {log_size}")]
    SizeBeyondLog { size: u64, log_size: u64 },

    /// A proof range is invalid (`old_size > new_size`).
    #[error("invalid range: old size {old_size} > new size {new_size}")]
    InvalidRange { old_size: u64, new_size: u64 },

    /// A proof has the wrong number of hashes for its claimed range.
    #[error("malformed proof: {0}")]
    MalformedProof(&'static str),

    /// A proof's recomputed root disagrees with the expected root.
    #[error("proof does not match the expected root hash")]
    ProofMismatch,
}
