//! Tree-head and SCT signing over the RFC 6962 signature inputs.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use skerry_types::tls;
use skerry_types::{Entry, LogId, Sct, SignedTreeHead};

use crate::error::LogError;

type Result<T> = std::result::Result<T, LogError>;

/// Signs tree heads and SCTs with the log's ed25519 key.
///
/// Signatures are deterministic: re-signing the same input yields the
/// same bytes, which keeps duplicate SCT issuance byte-identical.
pub struct SthSigner {
    signing_key: SigningKey,
    log_id: LogId,
}

impl SthSigner {
    /// Create a signer; the log ID is derived from the public key.
    pub fn new(signing_key: SigningKey) -> Self {
        let log_id = LogId::from_public_key(signing_key.verifying_key().as_bytes());
        Self {
            signing_key,
            log_id,
        }
    }

    /// The log's RFC 6962 identifier.
    pub fn log_id(&self) -> LogId {
        self.log_id
    }

    /// The log's public key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign a tree head.
    pub fn sign_tree_head(
        &self,
        tree_size: u64,
        timestamp_ms: u64,
        root_hash: [u8; 32],
    ) -> SignedTreeHead {
        let input = tls::tree_head_signature_input(timestamp_ms, tree_size, &root_hash);
        let signature: Signature = self.signing_key.sign(&input);
        SignedTreeHead {
            tree_size,
            timestamp_ms,
            root_hash,
            signature: tls::encode_digitally_signed(&signature.to_bytes()),
        }
    }

    /// Sign an SCT promising to sequence `entry` within the merge delay.
    pub fn sign_sct(&self, entry: &Entry, timestamp_ms: u64, extensions: Vec<u8>) -> Sct {
        let input = tls::sct_signature_input(
            timestamp_ms,
            entry.entry_type,
            &entry.leaf_input,
            &extensions,
        );
        let signature: Signature = self.signing_key.sign(&input);
        Sct {
            log_id: self.log_id,
            timestamp_ms,
            extensions,
            signature: tls::encode_digitally_signed(&signature.to_bytes()),
        }
    }
}

/// Verifies tree heads and SCTs against a log's public key. Used by
/// mirrors for upstream heads and by tests.
pub struct SthVerifier {
    verifying_key: VerifyingKey,
    log_id: LogId,
}

impl SthVerifier {
    /// Create a verifier from a public key.
    pub fn new(verifying_key: VerifyingKey) -> Self {
        let log_id = LogId::from_public_key(verifying_key.as_bytes());
        Self {
            verifying_key,
            log_id,
        }
    }

    /// Create a verifier from raw public key bytes.
    pub fn from_public_key_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| LogError::Validation(format!("invalid log public key: {e}")))?;
        Ok(Self::new(verifying_key))
    }

    /// The log ID this verifier checks against.
    pub fn log_id(&self) -> LogId {
        self.log_id
    }

    /// Verify a tree head signature.
    pub fn verify_tree_head(&self, sth: &SignedTreeHead) -> Result<()> {
        let raw = tls::decode_digitally_signed(&sth.signature)
            .ok_or_else(|| LogError::Validation("malformed tree head signature".into()))?;
        let signature = decode_signature(&raw)?;
        let input =
            tls::tree_head_signature_input(sth.timestamp_ms, sth.tree_size, &sth.root_hash);
        self.verifying_key
            .verify(&input, &signature)
            .map_err(|_| LogError::Validation("tree head signature does not verify".into()))
    }

    /// Verify an SCT against the entry it promises to include.
    pub fn verify_sct(&self, sct: &Sct, entry: &Entry) -> Result<()> {
        if sct.log_id != self.log_id {
            return Err(LogError::Validation("SCT issued by a different log".into()));
        }
        let raw = tls::decode_digitally_signed(&sct.signature)
            .ok_or_else(|| LogError::Validation("malformed SCT signature".into()))?;
        let signature = decode_signature(&raw)?;
        let input = tls::sct_signature_input(
            sct.timestamp_ms,
            entry.entry_type,
            &entry.leaf_input,
            &sct.extensions,
        );
        self.verifying_key
            .verify(&input, &signature)
            .map_err(|_| LogError::Validation("SCT signature does not verify".into()))
    }
}

fn decode_signature(raw: &[u8]) -> Result<Signature> {
    let bytes: [u8; 64] = raw
        .try_into()
        .map_err(|_| LogError::Validation("signature is not 64 bytes".into()))?;
    Ok(Signature::from_bytes(&bytes))
}
