//! Capability trait for the replicated key-value service.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::CoordError;

/// Identifier of a granted lease.
pub type LeaseId = u64;

/// A stored value plus the metadata callers need for CAS and staleness
/// detection. Reads may be stale; `mod_rev` lets the caller tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvRecord {
    /// Opaque value bytes (postcard-encoded records in this workspace).
    pub value: Vec<u8>,
    /// Revision at which the key was created.
    pub create_rev: u64,
    /// Revision of the latest write to the key.
    pub mod_rev: u64,
    /// Lease the key is attached to, if any. The key is deleted when the
    /// lease expires.
    pub lease: Option<LeaseId>,
}

/// A change observed by a prefix watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A key was created.
    Created { key: String, record: KvRecord },
    /// An existing key was overwritten.
    Modified { key: String, record: KvRecord },
    /// A key was removed (explicitly or by lease expiry).
    Deleted { key: String },
}

/// Capability set of the quorum-replicated KV service.
///
/// Every mutation carries an explicit expectation (absence for `insert`,
/// a modification revision for `update`/`remove`); unconditional writes
/// are not part of the contract. All implementations must be
/// `Send + Sync` for use across async tasks.
#[async_trait::async_trait]
pub trait CoordBackend: Send + Sync {
    /// Read a single key. Returns `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<KvRecord>, CoordError>;

    /// Read all keys under a prefix, in key order.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, KvRecord)>, CoordError>;

    /// Create a key that must not exist. Returns the new revision.
    ///
    /// When `lease` is set, the key is deleted once the lease expires.
    async fn insert(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<u64, CoordError>;

    /// Overwrite a key whose current revision must equal
    /// `expected_mod_rev`. Returns the new revision.
    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_mod_rev: u64,
    ) -> Result<u64, CoordError>;

    /// Delete a key whose current revision must equal `expected_mod_rev`.
    async fn remove(&self, key: &str, expected_mod_rev: u64) -> Result<(), CoordError>;

    /// Grant a lease with the given time-to-live.
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, CoordError>;

    /// Extend a lease to a full TTL from now.
    ///
    /// Fails with [`CoordError::LeaseExpired`] if the lease is gone; the
    /// holder must treat that as loss of every key attached to it.
    async fn keep_alive(&self, lease: LeaseId) -> Result<(), CoordError>;

    /// Revoke a lease, deleting its keys immediately.
    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), CoordError>;

    /// Watch a prefix for changes. The returned channel yields an
    /// unbounded sequence of events from the moment of the call; it
    /// closes when the backend shuts down or the watcher falls too far
    /// behind.
    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>, CoordError>;
}
