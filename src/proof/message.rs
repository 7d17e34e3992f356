//! Canonical Commitment Message
//!
//! A commitment proof is an ECDSA signature over the SHA-256 digest of a
//! canonical byte encoding of the commitment fields. Wallets build it with
//! [`CommitmentSigner`]; the validator rebuilds it byte for byte.
//!
//! ## Encoding
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  "BTC_COMMITMENT_V1"                     domain separator   │
//! │  owner          33 bytes                 compressed pubkey  │
//! │  address len    u16 LE                                      │
//! │  address        UTF-8, exactly as submitted                 │
//! │  amount         u64 LE                   satoshis           │
//! │  signed_at      u64 LE                   unix seconds       │
//! │  nonce          u64 LE                                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Proof envelope (80 bytes)
//!
//! ```text
//! signed_at (u64 BE) ‖ nonce (u64 BE) ‖ compact signature (64 bytes)
//! ```

use secp256k1::{ecdsa::Signature, Message, PublicKey, SecretKey, SECP256K1};

use crate::core::hash::{CommitHasher, Hash256};
use crate::core::time::Timestamp;

/// Length of an encoded proof envelope.
pub const PROOF_LEN: usize = 80;

/// Length of a compact ECDSA signature.
pub const SIGNATURE_LEN: usize = 64;

/// The fields a proof binds together.
#[derive(Clone, Copy, Debug)]
pub struct CommitmentMessage<'a> {
    /// Claimant's public key.
    pub owner: &'a PublicKey,
    /// Bitcoin address being committed.
    pub btc_address: &'a str,
    /// Claimed amount in satoshis.
    pub amount_satoshis: u64,
    /// When the wallet signed the commitment.
    pub signed_at: Timestamp,
    /// Wallet-chosen nonce.
    pub nonce: u64,
}

impl CommitmentMessage<'_> {
    /// Digest that gets signed.
    pub fn digest(&self) -> Hash256 {
        let mut hasher = CommitHasher::for_commitment();
        hasher.update_bytes(&self.owner.serialize());
        hasher.update_str(self.btc_address);
        hasher.update_u64(self.amount_satoshis);
        hasher.update_u64(self.signed_at);
        hasher.update_u64(self.nonce);
        hasher.finalize()
    }

    /// Digest wrapped as a secp256k1 message.
    pub fn to_message(&self) -> Message {
        Message::from_digest(self.digest())
    }
}

/// Decoded proof bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProofEnvelope {
    /// Signing timestamp.
    pub signed_at: Timestamp,
    /// Signing nonce.
    pub nonce: u64,
    /// Compact ECDSA signature.
    pub signature: [u8; SIGNATURE_LEN],
}

impl ProofEnvelope {
    /// Encode to the 80-byte wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PROOF_LEN);
        out.extend_from_slice(&self.signed_at.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    /// Decode from wire form. Returns None unless exactly `PROOF_LEN` bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != PROOF_LEN {
            return None;
        }

        let mut signed_at = [0u8; 8];
        signed_at.copy_from_slice(&bytes[0..8]);
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&bytes[8..16]);
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&bytes[16..PROOF_LEN]);

        Some(Self {
            signed_at: u64::from_be_bytes(signed_at),
            nonce: u64::from_be_bytes(nonce),
            signature,
        })
    }
}

/// Wallet-side helper producing commitment proofs.
pub struct CommitmentSigner {
    secret: SecretKey,
    owner: PublicKey,
}

impl CommitmentSigner {
    /// Create a signer from a secret key.
    pub fn new(secret: SecretKey) -> Self {
        let owner = PublicKey::from_secret_key(SECP256K1, &secret);
        Self { secret, owner }
    }

    /// Public key commitments are made under.
    pub fn owner(&self) -> PublicKey {
        self.owner
    }

    /// Sign a commitment and return the encoded proof envelope.
    pub fn sign(
        &self,
        btc_address: &str,
        amount_satoshis: u64,
        signed_at: Timestamp,
        nonce: u64,
    ) -> Vec<u8> {
        let message = CommitmentMessage {
            owner: &self.owner,
            btc_address,
            amount_satoshis,
            signed_at,
            nonce,
        };
        let signature: Signature = SECP256K1.sign_ecdsa(&message.to_message(), &self.secret);

        ProofEnvelope {
            signed_at,
            nonce,
            signature: signature.serialize_compact(),
        }
        .to_bytes()
    }
}
