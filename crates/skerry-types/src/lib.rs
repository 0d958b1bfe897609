//! Shared types and identifiers for Skerry.
//!
//! This crate defines the core data model used across the Skerry workspace:
//! identifiers ([`NodeId`], [`LogId`], [`LeafHash`]), log records ([`Entry`],
//! [`PendingEntry`], [`SignedTreeHead`], [`Sct`]), cluster control-plane
//! records ([`ClusterNodeState`], [`ClusterConfig`]), and the RFC 6962
//! signature-input encodings ([`tls`]).

pub mod events;
pub mod tls;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Create an ID by hashing arbitrary data with BLAKE3.
            pub fn from_data(data: &[u8]) -> Self {
                Self(blake3::hash(data).into())
            }

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_id!(
    /// Identifier for a cluster node, derived from its signing public key.
    NodeId
);

define_id!(
    /// RFC 6962 log identifier: `SHA256(log_public_key)`.
    LogId
);

impl LogId {
    /// Derive the log ID from the log's public key bytes.
    pub fn from_public_key(key_bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key_bytes);
        Self(hasher.finalize().into())
    }
}

/// RFC 6962 Merkle leaf hash: `SHA256(0x00 || leaf_input)`.
///
/// The leaf hash is the primary key of an entry throughout the system:
/// deduplication, sequence assignment, and proof lookup all key on it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct LeafHash([u8; 32]);

/// Domain-separation prefix for leaf hashes (RFC 6962 §2.1).
pub const LEAF_HASH_PREFIX: u8 = 0x00;

impl LeafHash {
    /// Compute the leaf hash of raw leaf input bytes.
    pub fn compute(leaf_input: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update([LEAF_HASH_PREFIX]);
        hasher.update(leaf_input);
        Self(hasher.finalize().into())
    }

    /// Return the raw 32-byte representation.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding, used as the key segment in the
    /// coordination store (`/entries/<hex>`).
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl From<[u8; 32]> for LeafHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for LeafHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for LeafHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for LeafHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeafHash({self})")
    }
}

// ---------------------------------------------------------------------------
// Log records
// ---------------------------------------------------------------------------

/// Kind of submitted entry (RFC 6962 `LogEntryType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// An end-entity X.509 certificate.
    X509,
    /// A precertificate.
    Precert,
}

impl EntryType {
    /// RFC 6962 wire value (`x509_entry(0)`, `precert_entry(1)`).
    pub fn wire_value(&self) -> u16 {
        match self {
            EntryType::X509 => 0,
            EntryType::Precert => 1,
        }
    }
}

/// An immutable log entry.
///
/// Once sequenced, the pair (sequence number, entry) never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The Merkle leaf input (TLS-encoded `MerkleTreeLeaf`).
    pub leaf_input: Vec<u8>,
    /// Auxiliary data served alongside the entry (e.g. the chain).
    pub extra_data: Vec<u8>,
    /// Submission timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Kind of entry.
    pub entry_type: EntryType,
}

impl Entry {
    /// The RFC 6962 leaf hash of this entry.
    pub fn leaf_hash(&self) -> LeafHash {
        LeafHash::compute(&self.leaf_input)
    }
}

/// An entry that has been accepted (SCT issued) but not yet sequenced.
///
/// Stored in the coordination store under `/entries/<leaf_hash>`. The SCT
/// timestamp starts the maximum-merge-delay clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// The accepted entry.
    pub entry: Entry,
    /// Timestamp promised in the issued SCT, in milliseconds.
    pub sct_timestamp_ms: u64,
}

/// A signed tree head: the log's commitment to its state at one instant.
///
/// For a given `tree_size` the `root_hash` is uniquely determined by the
/// entries at sequences `[0, tree_size)`; two STHs at the same size must
/// agree on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTreeHead {
    /// Number of leaves covered.
    pub tree_size: u64,
    /// Signing timestamp in milliseconds. Strictly monotonic per log.
    pub timestamp_ms: u64,
    /// RFC 6962 Merkle tree root over `[0, tree_size)`.
    pub root_hash: [u8; 32],
    /// Signature over [`tls::tree_head_signature_input`].
    pub signature: Vec<u8>,
}

/// A signed certificate timestamp: the log's promise to sequence an entry
/// within the maximum merge delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sct {
    /// The issuing log.
    pub log_id: LogId,
    /// Issuance timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// CT extensions (opaque, usually empty).
    pub extensions: Vec<u8>,
    /// Signature over [`tls::sct_signature_input`].
    pub signature: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Cluster control plane
// ---------------------------------------------------------------------------

/// Per-node state published under `/nodes/<node_id>`, lease-backed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNodeState {
    /// The reporting node.
    pub node_id: NodeId,
    /// The newest STH this node has signed or adopted, if any.
    pub newest_sth: Option<SignedTreeHead>,
    /// Largest `n` such that the node holds every entry in `[0, n)` locally.
    pub contiguous_tree_size: u64,
    /// When this state was published, in milliseconds.
    pub updated_at_ms: u64,
}

/// Cluster-wide policy stored under `/cluster_config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Maximum age of an STH that may be served to clients, in milliseconds.
    pub serving_freshness_window_ms: u64,
    /// Minimum number of nodes that must hold an entry before it is
    /// covered by the serving STH.
    pub quorum: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            serving_freshness_window_ms: 5 * 60 * 1000,
            quorum: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
