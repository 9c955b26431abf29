//! Canonical merkle hashing and proof verification
//!
//! The ledger commits each entry as a 32-byte leaf of a concurrent merkle
//! tree. Internal nodes hash their two children in order, left first, and
//! an unoccupied leaf is committed as the all-zero sentinel. Everything
//! here must match the on-chain verifier exactly or proofs fail root
//! verification.

use crate::types::Hash32;

/// On-chain commitment of an empty leaf
pub const ZERO_LEAF: Hash32 = [0u8; 32];

/// Hash two child nodes together, left first
pub fn hash_pair(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// Root of a fully empty subtree of the given depth
///
/// Depth 0 is a single empty leaf; each level up pairs the previous root
/// with itself.
pub fn empty_subtree_root(depth: u32) -> Hash32 {
    let mut node = ZERO_LEAF;
    for _ in 0..depth {
        node = hash_pair(&node, &node);
    }
    node
}

/// Recompute the node a proof authenticates to
///
/// Folds the sibling hashes over the leaf, taking left/right order from
/// the leaf index bits. With a full-length proof the result is the tree
/// root; with a canopy-truncated proof it is the subtree node at depth
/// `proof.len()`, which the on-chain program completes from its cached
/// canopy.
pub fn compute_root_from_proof(leaf_hash: &Hash32, leaf_index: u64, proof: &[Hash32]) -> Hash32 {
    let mut current = *leaf_hash;
    let mut position = leaf_index;

    for sibling in proof {
        current = if position & 1 == 0 {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        };
        position >>= 1;
    }

    current
}

/// Verify a proof against an expected root
pub fn verify_proof(
    leaf_hash: &Hash32,
    leaf_index: u64,
    proof: &[Hash32],
    root: &Hash32,
) -> bool {
    compute_root_from_proof(leaf_hash, leaf_index, proof) == *root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> Hash32 {
        [byte; 32]
    }

    #[test]
    fn hash_pair_is_order_sensitive() {
        let a = leaf(1);
        let b = leaf(2);
        assert_ne!(hash_pair(&a, &b), hash_pair(&b, &a));
    }

    #[test]
    fn empty_subtree_ladder_is_consistent() {
        assert_eq!(empty_subtree_root(0), ZERO_LEAF);
        for depth in 1..=14 {
            let below = empty_subtree_root(depth - 1);
            assert_eq!(empty_subtree_root(depth), hash_pair(&below, &below));
        }
    }

    #[test]
    fn proof_fold_reconstructs_small_tree_root() {
        // Depth 2, leaves h0..h3
        let leaves: Vec<Hash32> = (0..4).map(leaf).collect();
        let l01 = hash_pair(&leaves[0], &leaves[1]);
        let l23 = hash_pair(&leaves[2], &leaves[3]);
        let root = hash_pair(&l01, &l23);

        // Proof for leaf 2: sibling leaf 3, then the left pair node
        let proof = vec![leaves[3], l01];
        assert_eq!(compute_root_from_proof(&leaves[2], 2, &proof), root);
        assert!(verify_proof(&leaves[2], 2, &proof, &root));
    }

    #[test]
    fn proof_fold_rejects_wrong_sibling() {
        let leaves: Vec<Hash32> = (0..4).map(leaf).collect();
        let l01 = hash_pair(&leaves[0], &leaves[1]);
        let l23 = hash_pair(&leaves[2], &leaves[3]);
        let root = hash_pair(&l01, &l23);

        let proof = vec![leaves[1], l01];
        assert!(!verify_proof(&leaves[2], 2, &proof, &root));
    }

    #[test]
    fn empty_tree_verifies_against_empty_root() {
        // All-zero leaves: the proof for any position is the zero ladder
        let depth = 4;
        let proof: Vec<Hash32> = (0..depth).map(empty_subtree_root).collect();
        let root = empty_subtree_root(depth);
        assert!(verify_proof(&ZERO_LEAF, 0, &proof, &root));
        assert!(verify_proof(&ZERO_LEAF, 11, &proof, &root));
    }
}
