//! Error types for the log engine.

use skerry_coord::CoordError;
use skerry_db::DbError;
use skerry_merkle::MerkleError;

/// Coarse classification driving retry and surfacing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input or failed verification. Surfaced to the caller;
    /// no local state changed.
    Validation,
    /// Lost a race (CAS, duplicate, leadership). Recovered by re-reading
    /// state; surfaced as "duplicate" where idempotency matters.
    Conflict,
    /// Timeout or unavailable dependency. Retried with backoff.
    Transient,
    /// Invariant violation or unusable key material. The process refuses
    /// to sign; operator intervention required.
    Fatal,
}

/// Errors produced by the log engine.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Malformed or unverifiable input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Tree or proof error.
    #[error(transparent)]
    Merkle(#[from] MerkleError),

    /// Coordination-store error.
    #[error(transparent)]
    Coord(#[from] CoordError),

    /// Entry-database error.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Lost leadership or a sequencing race; the caller re-reads state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unrecoverable condition. Signing must stop.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl LogError {
    /// Classify the error for retry and surfacing decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LogError::Validation(_) => ErrorKind::Validation,
            LogError::Merkle(_) => ErrorKind::Validation,
            LogError::Conflict(_) => ErrorKind::Conflict,
            LogError::Fatal(_) => ErrorKind::Fatal,
            LogError::Coord(e) => {
                if e.is_conflict() {
                    ErrorKind::Conflict
                } else if e.is_transient() {
                    ErrorKind::Transient
                } else {
                    match e {
                        CoordError::LeaseExpired => ErrorKind::Conflict,
                        CoordError::InvalidTransition(_) => ErrorKind::Conflict,
                        _ => ErrorKind::Transient,
                    }
                }
            }
            LogError::Db(e) => match e {
                DbError::SequenceConflict { .. }
                | DbError::HashConflict { .. }
                | DbError::StagedMissing(_) => ErrorKind::Conflict,
                DbError::Corrupt(_) => ErrorKind::Fatal,
                DbError::Storage(_) | DbError::Serialization(_) => ErrorKind::Transient,
            },
        }
    }

    /// Whether the signing process must stop over this error.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}
