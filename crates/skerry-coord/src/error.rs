//! Error types for the coordination crate.

/// Errors that can occur during coordination-store operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    /// Create-if-absent lost: the key already exists.
    #[error("key already exists")]
    AlreadyExists,

    /// The key does not exist.
    #[error("key not found")]
    NotFound,

    /// A compare-and-swap lost to a concurrent writer.
    #[error("compare-and-swap failed: expected revision {expected}, found {actual}")]
    CasFailed { expected: u64, actual: u64 },

    /// The lease backing this operation is no longer live.
    #[error("lease expired")]
    LeaseExpired,

    /// The operation did not complete within its deadline.
    #[error("operation deadline exceeded")]
    Deadline,

    /// A mutation would violate a store invariant (e.g. a regressing
    /// serving tree head).
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The backing service failed or is unreachable.
    #[error("backend error: {0}")]
    Backend(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoordError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordError::Deadline | CoordError::Backend(_))
    }

    /// Whether the operation lost a race and the caller should re-read
    /// state before retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CoordError::AlreadyExists | CoordError::CasFailed { .. }
        )
    }
}

impl From<postcard::Error> for CoordError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
