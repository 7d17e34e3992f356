//! Oracle Attestations
//!
//! A single balance/price observation for one Bitcoin address, optionally
//! backed by inclusion proofs against a committed UTXO snapshot.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::hash::{CommitHasher, Hash256};
use crate::core::time::Timestamp;
use crate::proof::merkle::{MerkleProof, MerkleTree};

/// One unspent output in an oracle snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Funding transaction id.
    pub txid: Hash256,
    /// Output index.
    pub vout: u32,
    /// Output value.
    pub value_sats: u64,
}

impl Utxo {
    /// Leaf encoding inside the snapshot tree.
    pub fn leaf_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(44);
        out.extend_from_slice(&self.txid);
        out.extend_from_slice(&self.vout.to_le_bytes());
        out.extend_from_slice(&self.value_sats.to_le_bytes());
        out
    }
}

/// A UTXO together with its inclusion path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoInclusion {
    /// The output.
    pub utxo: Utxo,
    /// Path from the output's leaf to the snapshot root.
    pub path: MerkleProof,
}

/// Independent verification data for an attested balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoProof {
    /// Root of the oracle's UTXO snapshot.
    pub snapshot_root: Hash256,
    /// Bitcoin block height of the snapshot.
    pub snapshot_height: u64,
    /// Outputs that make up the balance.
    pub outputs: Vec<UtxoInclusion>,
}

impl UtxoProof {
    /// Build a proof for `owned` outputs (indexes into `snapshot`).
    ///
    /// Returns None if any index is out of range.
    pub fn build(snapshot: &[Utxo], owned: &[usize], snapshot_height: u64) -> Option<Self> {
        let leaves: Vec<Vec<u8>> = snapshot.iter().map(Utxo::leaf_bytes).collect();
        let tree = MerkleTree::from_leaves(&leaves);

        let outputs = owned
            .iter()
            .map(|&index| {
                Some(UtxoInclusion {
                    utxo: snapshot.get(index)?.clone(),
                    path: tree.generate_proof(index)?,
                })
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            snapshot_root: tree.root(),
            snapshot_height,
            outputs,
        })
    }

    /// Check every inclusion path and that the outputs sum to `balance_sats`.
    pub fn verify(&self, balance_sats: u64) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        let mut total: u64 = 0;

        for inclusion in &self.outputs {
            let outpoint = (inclusion.utxo.txid, inclusion.utxo.vout);
            if !seen.insert(outpoint) {
                return Err(format!(
                    "duplicate output {}:{}",
                    hex::encode(inclusion.utxo.txid),
                    inclusion.utxo.vout
                ));
            }

            if !MerkleTree::verify_proof(&self.snapshot_root, &inclusion.path, &inclusion.utxo.leaf_bytes()) {
                return Err(format!(
                    "output {}:{} not in snapshot {}",
                    hex::encode(inclusion.utxo.txid),
                    inclusion.utxo.vout,
                    hex::encode(self.snapshot_root)
                ));
            }

            total = total
                .checked_add(inclusion.utxo.value_sats)
                .ok_or_else(|| "output values overflow".to_string())?;
        }

        if total != balance_sats {
            return Err(format!("outputs sum to {} sats, attested {}", total, balance_sats));
        }
        Ok(())
    }
}

/// A single balance/price observation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleAttestation {
    /// Address observed.
    pub btc_address: String,
    /// Confirmed on-chain balance.
    pub balance_satoshis: u64,
    /// BTC price in USD cents.
    pub usd_price: u64,
    /// When the oracle made the observation.
    pub observed_at: Timestamp,
    /// Oracle source identifier.
    pub source_id: String,
    /// Optional verification data.
    #[serde(default)]
    pub utxo_proof: Option<UtxoProof>,
}

impl OracleAttestation {
    /// Seconds between observation and `now` (zero if observed in the future).
    pub fn age(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.observed_at)
    }

    /// Stable hash of the observation, for the audit trail.
    pub fn digest(&self) -> Hash256 {
        let mut hasher = CommitHasher::for_attestation();
        hasher.update_str(&self.btc_address);
        hasher.update_u64(self.balance_satoshis);
        hasher.update_u64(self.usd_price);
        hasher.update_u64(self.observed_at);
        hasher.update_str(&self.source_id);
        if let Some(proof) = &self.utxo_proof {
            hasher.update_bytes(&proof.snapshot_root);
            hasher.update_u64(proof.snapshot_height);
        }
        hasher.finalize()
    }

    /// Reference retained once this observation changes ledger state.
    pub fn reference(&self) -> AttestationRef {
        AttestationRef {
            hash: self.digest(),
            observed_at: self.observed_at,
            source_id: self.source_id.clone(),
        }
    }
}

/// Audit reference to an attestation that drove a state change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRef {
    /// Attestation digest.
    pub hash: Hash256,
    /// Observation time.
    pub observed_at: Timestamp,
    /// Oracle source.
    pub source_id: String,
}

/// How old a served attestation is relative to the freshness threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Within the freshness threshold.
    Fresh,
    /// Past the threshold but inside the tolerance band.
    Stale {
        /// Age at the time it was served.
        age_secs: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Vec<Utxo> {
        (0u8..6)
            .map(|i| Utxo {
                txid: [i; 32],
                vout: i as u32,
                value_sats: 10_000 * (i as u64 + 1),
            })
            .collect()
    }

    #[test]
    fn test_utxo_proof_roundtrip() {
        let snapshot = snapshot();
        let proof = UtxoProof::build(&snapshot, &[1, 4], 840_000).unwrap();

        // 20_000 + 50_000
        assert!(proof.verify(70_000).is_ok());
        assert!(proof.verify(70_001).is_err());
    }

    #[test]
    fn test_utxo_proof_rejects_forged_value() {
        let snapshot = snapshot();
        let mut proof = UtxoProof::build(&snapshot, &[2], 840_000).unwrap();
        proof.outputs[0].utxo.value_sats = 1_000_000;

        assert!(proof.verify(1_000_000).is_err());
    }

    #[test]
    fn test_utxo_proof_rejects_duplicates() {
        let snapshot = snapshot();
        let proof = UtxoProof::build(&snapshot, &[3, 3], 840_000).unwrap();

        let err = proof.verify(80_000).unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn test_build_rejects_out_of_range() {
        assert!(UtxoProof::build(&snapshot(), &[6], 1).is_none());
    }

    #[test]
    fn test_digest_changes_with_balance() {
        let attestation = OracleAttestation {
            btc_address: "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq".into(),
            balance_satoshis: 100_000_000,
            usd_price: 6_500_000,
            observed_at: 1_700_000_000,
            source_id: "oracle-a".into(),
            utxo_proof: None,
        };
        let other = OracleAttestation { balance_satoshis: 50_000_000, ..attestation.clone() };

        assert_ne!(attestation.digest(), other.digest());
        assert_eq!(attestation.reference().observed_at, 1_700_000_000);
        assert_eq!(attestation.age(1_700_000_060), 60);
        assert_eq!(attestation.age(0), 0);
    }
}
