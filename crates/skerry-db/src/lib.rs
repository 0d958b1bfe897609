//! Durable entry database: the per-node storage for sequenced log entries.
//!
//! Two write-once indices back every read path in the system:
//!
//! - `by_seq`: sequence number → entry (dense, gap-free up to the
//!   contiguous watermark).
//! - `by_hash`: leaf hash → sequence number.
//!
//! Entries are staged under their leaf hash when accepted, then
//! atomically promoted to a sequence number by the sequencer (or the
//! mirror fetcher). The latest locally-adopted signed tree head lives
//! alongside, and is checked against the contiguous watermark on open.

mod error;
mod store;


pub use error::DbError;
pub use store::EntryDb;
