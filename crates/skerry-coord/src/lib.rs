//! Replicated control plane for the log cluster.
//!
//! All cross-node agreement rides on a quorum-replicated key-value
//! service with compare-and-swap, leases, and prefix watches. This crate
//! holds:
//!
//! - [`CoordBackend`] — the capability trait the external KV service must
//!   satisfy, plus [`MemoryCoord`], a single-process implementation used
//!   by tests and single-node deployments.
//! - [`ConsistentStore`] — the per-log namespace logic: pending entries,
//!   the sequence mapping, node states, published and serving tree heads,
//!   and cluster configuration. Every mutation is CAS-guarded; blind
//!   writes do not exist.
//! - [`StrictStore`] — the leader-only mutation surface. Writes are
//!   refused once the leadership lease is no longer live.
//! - [`election`] — lease-based leader election: at most one signer
//!   cluster-wide, with a local leadership signal that drops strictly
//!   before peers can observe lease expiry.

mod backend;
pub mod election;
mod error;
mod memory;
mod store;

#[cfg(test)]
mod tests;

pub use backend::{CoordBackend, KvRecord, LeaseId, WatchEvent};
pub use election::{ElectionConfig, ElectionHandle};
pub use error::CoordError;
pub use memory::MemoryCoord;
pub use store::{AddOutcome, ConsistentStore, SequenceMapping, StrictStore};
