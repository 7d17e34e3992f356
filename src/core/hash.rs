//! Domain-Separated Hashing
//!
//! SHA-256 over canonical encodings. Each use gets its own domain prefix:
//! the message a wallet signs, the attestation reference stored in the
//! audit trail, and the UTXO snapshot tree nodes.

use sha2::{Digest, Sha256};

/// 32-byte SHA-256 output.
pub type Hash256 = [u8; 32];

/// Prefix of the canonical commitment message.
pub const COMMITMENT_DOMAIN: &[u8] = b"BTC_COMMITMENT_V1";

/// Prefix of oracle attestation references.
pub const ATTESTATION_DOMAIN: &[u8] = b"BTC_ATTESTATION_V1";

/// Incremental hasher for canonical encodings.
///
/// Integers are little-endian and strings carry a u16 length prefix, so
/// both sides of a signature agree on the bytes as long as they call the
/// same sequence of updates.
pub struct CommitHasher {
    inner: Sha256,
}

impl CommitHasher {
    /// Start a hash under `domain`.
    pub fn new(domain: &[u8]) -> Self {
        let mut inner = Sha256::new();
        inner.update(domain);
        Self { inner }
    }

    /// Hasher for the message a wallet signs.
    pub fn for_commitment() -> Self {
        Self::new(COMMITMENT_DOMAIN)
    }

    /// Hasher for attestation references.
    pub fn for_attestation() -> Self {
        Self::new(ATTESTATION_DOMAIN)
    }

    /// Append raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    /// Append a u16.
    #[inline]
    pub fn update_u16(&mut self, value: u16) {
        self.inner.update(value.to_le_bytes());
    }

    /// Append a u64.
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.inner.update(value.to_le_bytes());
    }

    /// Append a length-prefixed string.
    ///
    /// Callers bound strings to `u16::MAX` bytes before hashing.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u16(value.len() as u16);
        self.inner.update(value.as_bytes());
    }

    /// Consume the hasher.
    pub fn finalize(self) -> Hash256 {
        self.inner.finalize().into()
    }
}

// =============================================================================
// TESTS
// =============================================================================
