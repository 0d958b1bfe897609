//! Error types for the entry database.

use skerry_types::LeafHash;

/// Errors that can occur during entry database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A sequence number is already bound to a different leaf hash.
    #[error("sequence {seq} already assigned to a different entry")]
    SequenceConflict { seq: u64 },

    /// A leaf hash is already bound to a different sequence number.
    #[error("leaf hash {leaf_hash} already sequenced at {existing_seq}")]
    HashConflict {
        leaf_hash: LeafHash,
        existing_seq: u64,
    },

    /// Promotion was requested for a leaf hash with no staged entry.
    #[error("no staged entry for leaf hash {0}")]
    StagedMissing(LeafHash),

    /// The database contradicts an invariant (e.g. a stored tree head
    /// covering entries the node does not hold). Operator intervention
    /// required.
    #[error("entry database corrupt: {0}")]
    Corrupt(String),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<postcard::Error> for DbError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
