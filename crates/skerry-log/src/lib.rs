//! The log engine: everything that turns accepted submissions into a
//! signed, quorum-served, verifiable tree.
//!
//! Components, write path first:
//!
//! - [`Submitter`] — accepts an entry, CAS-inserts it as pending, issues
//!   an SCT. Idempotent on the leaf hash.
//! - [`Sequencer`] — leader-only loop: drains pending entries, assigns
//!   dense sequence numbers through the coordination store, extends the
//!   compact tree, signs and publishes tree heads, garbage-collects
//!   covered pending entries.
//! - [`ClusterController`] — per-node loop: heartbeats node state,
//!   adopts published tree heads, advances the quorum-gated serving
//!   tree head.
//! - [`LogLookup`] — read-side index rebuilt on serving-head adoption;
//!   serves entries and proofs.
//! - [`Fetcher`] — mirror mode: verified windowed pull from an upstream
//!   log; never signs.

mod controller;
mod error;
mod fetcher;
mod lookup;
mod sequencer;
mod signer;
mod submit;

#[cfg(test)]
mod tests;

pub use controller::{ClusterController, ControllerConfig};
pub use error::{ErrorKind, LogError};
pub use fetcher::{Fetcher, FetcherConfig, UpstreamLog};
pub use lookup::{LogLookup, LookupUpdater};
pub use sequencer::{Sequencer, SequencerConfig};
pub use signer::{SthSigner, SthVerifier};
pub use submit::Submitter;
