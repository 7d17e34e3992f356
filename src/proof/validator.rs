//! Commitment Proof Validator
//!
//! Stateless check that a submitted commitment is authentic and fresh.
//! The validator holds only immutable configuration, so a single instance
//! can be shared across threads behind an `Arc` with no locking.

use std::str::FromStr;

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network};
use secp256k1::{ecdsa::Signature, PublicKey, SECP256K1};
use thiserror::Error;
use tracing::debug;

use crate::config::{env_or, ConfigError};
use crate::core::amount::{is_valid_amount, sats_to_usd_cents};
use crate::core::time::Timestamp;
use crate::proof::message::{CommitmentMessage, ProofEnvelope, PROOF_LEN};

/// Proof validation configuration.
#[derive(Clone, Debug)]
pub struct ProofConfig {
    /// Network every committed address must belong to.
    pub network: Network,
    /// Maximum age of `signed_at` at submission time.
    pub acceptance_window_secs: u64,
    /// Tolerated clock skew for `signed_at` in the future.
    pub max_future_skew_secs: u64,
    /// Highest BTC price (USD cents) the USD conversion must survive.
    pub max_usd_price_cents: u64,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            acceptance_window_secs: 300,
            max_future_skew_secs: 30,
            // $1B per BTC
            max_usd_price_cents: 100_000_000_000,
        }
    }
}

impl ProofConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            network: env_or("COMMIT_NETWORK", defaults.network)?,
            acceptance_window_secs: env_or("COMMIT_PROOF_WINDOW_SECS", defaults.acceptance_window_secs)?,
            max_future_skew_secs: env_or("COMMIT_PROOF_MAX_SKEW_SECS", defaults.max_future_skew_secs)?,
            max_usd_price_cents: env_or("COMMIT_MAX_USD_PRICE_CENTS", defaults.max_usd_price_cents)?,
        })
    }
}

/// Proof validation errors.
///
/// All variants are client-caused and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    /// Proof bytes have the wrong length or encoding.
    #[error("malformed proof: expected {PROOF_LEN} bytes, got {len}")]
    MalformedProof {
        /// Length actually received.
        len: usize,
    },
    /// Address does not parse or belongs to another network.
    #[error("invalid bitcoin address: {0}")]
    InvalidAddress(String),
    /// Amount is zero, above total supply, or overflows USD conversion.
    #[error("amount out of range: {0} sats")]
    AmountOutOfRange(u64),
    /// Signature does not verify for the expected signer.
    #[error("proof signature invalid")]
    SignatureMismatch,
    /// Signing timestamp outside the acceptance window.
    #[error("proof nonce too old or from the future: signed at {signed_at}, now {now}")]
    StaleNonce {
        /// Timestamp embedded in the proof.
        signed_at: Timestamp,
        /// Validator's clock at the time of the check.
        now: Timestamp,
    },
}

/// The commitment fields a proof is checked against.
#[derive(Clone, Copy, Debug)]
pub struct CommitmentClaim<'a> {
    /// Claimed owner key.
    pub owner: &'a PublicKey,
    /// Bitcoin address being committed.
    pub btc_address: &'a str,
    /// Claimed amount.
    pub amount_satoshis: u64,
}

/// Stateless proof validator.
#[derive(Clone, Debug, Default)]
pub struct ProofValidator {
    config: ProofConfig,
}

impl ProofValidator {
    /// Create a validator.
    pub fn new(config: ProofConfig) -> Self {
        Self { config }
    }

    /// Validator configuration.
    pub fn config(&self) -> &ProofConfig {
        &self.config
    }

    /// Full check for a new submission, including freshness.
    ///
    /// Signature is checked before freshness so that tampering with the
    /// embedded timestamp reports `SignatureMismatch`.
    pub fn validate(
        &self,
        claim: &CommitmentClaim<'_>,
        proof: &[u8],
        expected_signer: &PublicKey,
        now: Timestamp,
    ) -> Result<ProofEnvelope, ProofError> {
        let envelope = self.revalidate(claim, proof, expected_signer)?;
        self.check_freshness(envelope.signed_at, now)?;
        Ok(envelope)
    }

    /// Structural and cryptographic check without freshness.
    ///
    /// Used on every reconciliation to catch ledger or proof corruption;
    /// a stored proof is expected to be older than the acceptance window.
    pub fn revalidate(
        &self,
        claim: &CommitmentClaim<'_>,
        proof: &[u8],
        expected_signer: &PublicKey,
    ) -> Result<ProofEnvelope, ProofError> {
        let envelope = ProofEnvelope::from_bytes(proof)
            .ok_or(ProofError::MalformedProof { len: proof.len() })?;

        self.check_address(claim.btc_address)?;
        self.check_amount(claim.amount_satoshis)?;

        let message = CommitmentMessage {
            owner: claim.owner,
            btc_address: claim.btc_address,
            amount_satoshis: claim.amount_satoshis,
            signed_at: envelope.signed_at,
            nonce: envelope.nonce,
        };

        let signature = Signature::from_compact(&envelope.signature)
            .map_err(|_| ProofError::SignatureMismatch)?;
        SECP256K1
            .verify_ecdsa(&message.to_message(), &signature, expected_signer)
            .map_err(|_| ProofError::SignatureMismatch)?;

        debug!(address = claim.btc_address, nonce = envelope.nonce, "proof signature verified");
        Ok(envelope)
    }

    /// Parse and network-check a Bitcoin address.
    pub fn check_address(&self, btc_address: &str) -> Result<Address, ProofError> {
        let unchecked = Address::<NetworkUnchecked>::from_str(btc_address)
            .map_err(|e| ProofError::InvalidAddress(e.to_string()))?;
        unchecked
            .require_network(self.config.network)
            .map_err(|e| ProofError::InvalidAddress(e.to_string()))
    }

    fn check_amount(&self, amount_satoshis: u64) -> Result<(), ProofError> {
        if !is_valid_amount(amount_satoshis)
            || sats_to_usd_cents(amount_satoshis, self.config.max_usd_price_cents).is_none()
        {
            return Err(ProofError::AmountOutOfRange(amount_satoshis));
        }
        Ok(())
    }

    fn check_freshness(&self, signed_at: Timestamp, now: Timestamp) -> Result<(), ProofError> {
        let too_old = now.saturating_sub(signed_at) > self.config.acceptance_window_secs;
        let too_new = signed_at.saturating_sub(now) > self.config.max_future_skew_secs;
        if too_old || too_new {
            return Err(ProofError::StaleNonce { signed_at, now });
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
