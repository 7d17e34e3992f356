//! UTXO Snapshot Trees
//!
//! An oracle commits to the UTXO set it observed with a single SHA-256 root.
//! Alongside an attested balance it can ship one inclusion path per output,
//! which lets the verifier re-derive the root without trusting the feed.
//!
//! Levels with an odd node count are padded with [`empty_hash`], so every
//! path has exactly one sibling per level and the sibling's side is given
//! by the bits of the leaf index.

use serde::{Deserialize, Serialize};

use crate::core::hash::{CommitHasher, Hash256};

const LEAF_DOMAIN: &[u8] = b"BTC_UTXO_MERKLE_LEAF_V1";
const NODE_DOMAIN: &[u8] = b"BTC_UTXO_MERKLE_NODE_V1";
const EMPTY_DOMAIN: &[u8] = b"BTC_UTXO_MERKLE_EMPTY_V1";

/// Root of an empty snapshot, also used as padding.
pub fn empty_hash() -> Hash256 {
    CommitHasher::new(EMPTY_DOMAIN).finalize()
}

fn leaf_hash(data: &[u8]) -> Hash256 {
    let mut hasher = CommitHasher::new(LEAF_DOMAIN);
    hasher.update_bytes(data);
    hasher.finalize()
}

fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = CommitHasher::new(NODE_DOMAIN);
    hasher.update_bytes(left);
    hasher.update_bytes(right);
    hasher.finalize()
}

/// Inclusion path for one leaf.
///
/// `path[i]` is the sibling at level `i` (leaves are level 0). Bit `i` of
/// `leaf_index` says whether the running hash is the right child there.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Position of the leaf in the snapshot.
    pub leaf_index: u64,
    /// Sibling hashes from the leaf level up.
    pub path: Vec<Hash256>,
}

/// Snapshot tree with every level kept for path generation.
#[derive(Clone, Debug, Default)]
pub struct MerkleTree {
    /// `levels[0]` holds the leaf hashes, the last level holds the root.
    levels: Vec<Vec<Hash256>>,
}

impl MerkleTree {
    /// Build a tree over the encoded leaves, in order.
    pub fn from_leaves<T: AsRef<[u8]>>(leaves: &[T]) -> Self {
        if leaves.is_empty() {
            return Self::default();
        }

        let mut levels = vec![leaves.iter().map(|l| leaf_hash(l.as_ref())).collect::<Vec<_>>()];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let parents = level
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).copied().unwrap_or_else(empty_hash);
                    node_hash(&pair[0], &right)
                })
                .collect();
            levels.push(parents);
        }

        Self { levels }
    }

    /// Snapshot root.
    pub fn root(&self) -> Hash256 {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_else(empty_hash)
    }

    /// Number of leaves committed to.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Inclusion path for the leaf at `index`, or None if out of range.
    pub fn generate_proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut path = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = level.get(position ^ 1).copied().unwrap_or_else(empty_hash);
            path.push(sibling);
            position /= 2;
        }

        Some(MerkleProof {
            leaf_index: index as u64,
            path,
        })
    }

    /// Check that `leaf` sits at `proof.leaf_index` under `root`.
    ///
    /// An index with bits above the path length is rejected, so one path
    /// cannot be replayed for a different position.
    pub fn verify_proof(root: &Hash256, proof: &MerkleProof, leaf: &[u8]) -> bool {
        if proof.path.len() < 64 && proof.leaf_index >> proof.path.len() != 0 {
            return false;
        }

        let mut running = leaf_hash(leaf);
        for (level, sibling) in proof.path.iter().enumerate() {
            let is_right = level < 64 && (proof.leaf_index >> level) & 1 == 1;
            running = if is_right {
                node_hash(sibling, &running)
            } else {
                node_hash(&running, sibling)
            };
        }
        running == *root
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// txid || vout || value, the same shape the oracle uses.
    fn output(n: u8, value: u64) -> Vec<u8> {
        let mut leaf = vec![n; 32];
        leaf.extend_from_slice(&u32::from(n).to_le_bytes());
        leaf.extend_from_slice(&value.to_le_bytes());
        leaf
    }

    fn snapshot(size: u8) -> Vec<Vec<u8>> {
        (0..size).map(|n| output(n, 10_000 * u64::from(n) + 1)).collect()
    }

    #[test]
    fn test_empty_snapshot() {
        let tree = MerkleTree::from_leaves::<Vec<u8>>(&[]);
        assert_eq!(tree.leaf_count(), 0);
        assert_eq!(tree.root(), empty_hash());
        assert!(tree.generate_proof(0).is_none());
    }

    #[test]
    fn test_single_output_snapshot() {
        let leaves = snapshot(1);
        let tree = MerkleTree::from_leaves(&leaves);
        let proof = tree.generate_proof(0).unwrap();

        assert!(proof.path.is_empty());
        assert_eq!(tree.root(), leaf_hash(&leaves[0]));
        assert!(MerkleTree::verify_proof(&tree.root(), &proof, &leaves[0]));
    }

    #[test]
    fn test_every_output_provable_with_odd_levels() {
        let leaves = snapshot(7);
        let tree = MerkleTree::from_leaves(&leaves);
        let root = tree.root();

        for (index, leaf) in leaves.iter().enumerate() {
            let proof = tree.generate_proof(index).unwrap();
            assert_eq!(proof.path.len(), 3);
            assert!(MerkleTree::verify_proof(&root, &proof, leaf), "output {}", index);
        }
        assert!(tree.generate_proof(7).is_none());
    }

    #[test]
    fn test_changed_value_changes_root() {
        let mut leaves = snapshot(4);
        let before = MerkleTree::from_leaves(&leaves).root();
        leaves[2] = output(2, 1);
        assert_ne!(MerkleTree::from_leaves(&leaves).root(), before);
    }

    #[test]
    fn test_inflated_output_rejected() {
        let leaves = snapshot(4);
        let tree = MerkleTree::from_leaves(&leaves);
        let proof = tree.generate_proof(1).unwrap();

        assert!(!MerkleTree::verify_proof(&tree.root(), &proof, &output(1, u64::MAX)));
        assert!(!MerkleTree::verify_proof(&[7u8; 32], &proof, &leaves[1]));
    }

    #[test]
    fn test_path_replayed_at_other_index_rejected() {
        let leaves = snapshot(4);
        let tree = MerkleTree::from_leaves(&leaves);
        let mut proof = tree.generate_proof(1).unwrap();

        proof.leaf_index = 0;
        assert!(!MerkleTree::verify_proof(&tree.root(), &proof, &leaves[1]));

        // Same low bits, but beyond the tree depth.
        proof.leaf_index = 1 | 1 << 2;
        assert!(!MerkleTree::verify_proof(&tree.root(), &proof, &leaves[1]));
    }

    #[test]
    fn test_padding_is_not_a_leaf() {
        // Three outputs pad the last pair with the empty marker; a fourth
        // leaf equal to nothing must not produce the same root.
        let three = snapshot(3);
        let mut four = three.clone();
        four.push(Vec::new());
        assert_ne!(MerkleTree::from_leaves(&three).root(), MerkleTree::from_leaves(&four).root());
    }

    #[test]
    fn test_proof_json_shape() {
        let tree = MerkleTree::from_leaves(&snapshot(2));
        let proof = tree.generate_proof(1).unwrap();
        let json = serde_json::to_value(&proof).unwrap();

        assert_eq!(json["leaf_index"], 1);
        assert_eq!(json["path"].as_array().map(Vec::len), Some(1));
    }

    proptest! {
        #[test]
        fn prop_generated_paths_verify(size in 1u8..64, pick in any::<u8>()) {
            let leaves = snapshot(size);
            let tree = MerkleTree::from_leaves(&leaves);
            let index = usize::from(pick % size);
            let proof = tree.generate_proof(index).unwrap();

            prop_assert!(MerkleTree::verify_proof(&tree.root(), &proof, &leaves[index]));
        }
    }
}
