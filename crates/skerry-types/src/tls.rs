//! RFC 6962 TLS-encoded signature inputs.
//!
//! These encodings are bit-exact: an STH or SCT produced here verifies
//! against any RFC 6962 implementation given the same key. Layout follows
//! RFC 5246 presentation language — fixed-width big-endian integers and
//! length-prefixed opaque vectors.

use crate::EntryType;

/// Protocol version `v1(0)`.
pub const VERSION_V1: u8 = 0;

/// `SignatureType.certificate_timestamp(0)` — SCT signatures.
pub const SIGNATURE_TYPE_CERTIFICATE_TIMESTAMP: u8 = 0;

/// `SignatureType.tree_hash(1)` — STH signatures.
pub const SIGNATURE_TYPE_TREE_HASH: u8 = 1;

/// Hash algorithm code point for the `DigitallySigned` wrapper.
/// `intrinsic(8)` per RFC 8422 (Ed25519 hashes internally).
pub const HASH_ALGORITHM_INTRINSIC: u8 = 8;

/// Signature algorithm code point `ed25519(7)` per RFC 8422.
pub const SIGNATURE_ALGORITHM_ED25519: u8 = 7;

/// Encode the signature input for a tree head.
///
/// ```text
/// struct {
///     Version version;            // 1 byte, v1(0)
///     SignatureType signature_type; // 1 byte, tree_hash(1)
///     uint64 timestamp;
///     uint64 tree_size;
///     opaque sha256_root_hash[32];
/// } TreeHeadSignature;
/// ```
pub fn tree_head_signature_input(timestamp_ms: u64, tree_size: u64, root_hash: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + 8 + 8 + 32);
    out.push(VERSION_V1);
    out.push(SIGNATURE_TYPE_TREE_HASH);
    out.extend_from_slice(&timestamp_ms.to_be_bytes());
    out.extend_from_slice(&tree_size.to_be_bytes());
    out.extend_from_slice(root_hash);
    out
}

/// Encode the signature input for a signed certificate timestamp.
///
/// ```text
/// struct {
///     Version version;              // 1 byte, v1(0)
///     SignatureType signature_type; // 1 byte, certificate_timestamp(0)
///     uint64 timestamp;
///     LogEntryType entry_type;      // 2 bytes
///     opaque signed_entry<0..2^24-1>;
///     CtExtensions extensions<0..2^16-1>;
/// } CertificateTimestamp;
/// ```
pub fn sct_signature_input(
    timestamp_ms: u64,
    entry_type: EntryType,
    signed_entry: &[u8],
    extensions: &[u8],
) -> Vec<u8> {
    debug_assert!(signed_entry.len() < (1 << 24));
    debug_assert!(extensions.len() < (1 << 16));

    let mut out = Vec::with_capacity(2 + 8 + 2 + 3 + signed_entry.len() + 2 + extensions.len());
    out.push(VERSION_V1);
    out.push(SIGNATURE_TYPE_CERTIFICATE_TIMESTAMP);
    out.extend_from_slice(&timestamp_ms.to_be_bytes());
    out.extend_from_slice(&entry_type.wire_value().to_be_bytes());
    // opaque<0..2^24-1>: 3-byte big-endian length prefix.
    let len = signed_entry.len() as u32;
    out.extend_from_slice(&len.to_be_bytes()[1..]);
    out.extend_from_slice(signed_entry);
    // opaque<0..2^16-1>: 2-byte big-endian length prefix.
    out.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    out.extend_from_slice(extensions);
    out
}

/// Wrap a raw signature in the TLS `DigitallySigned` structure:
/// one byte each of hash and signature algorithm, then a 16-bit
/// length-prefixed signature.
pub fn encode_digitally_signed(signature: &[u8]) -> Vec<u8> {
    debug_assert!(signature.len() < (1 << 16));
    let mut out = Vec::with_capacity(4 + signature.len());
    out.push(HASH_ALGORITHM_INTRINSIC);
    out.push(SIGNATURE_ALGORITHM_ED25519);
    out.extend_from_slice(&(signature.len() as u16).to_be_bytes());
    out.extend_from_slice(signature);
    out
}

/// Unwrap a TLS `DigitallySigned` structure, returning the raw signature.
///
/// Returns `None` on truncated input, unknown algorithm code points, or a
/// length prefix that disagrees with the remaining bytes.
pub fn decode_digitally_signed(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.len() < 4 {
        return None;
    }
    if bytes[0] != HASH_ALGORITHM_INTRINSIC || bytes[1] != SIGNATURE_ALGORITHM_ED25519 {
        return None;
    }
    let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    let rest = &bytes[4..];
    if rest.len() != len {
        return None;
    }
    Some(rest.to_vec())
}
