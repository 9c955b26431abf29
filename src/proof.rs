//! Merkle proof reconstruction
//!
//! Builds the authentication path for a cached entry from leaf hashes
//! alone. The indexer never stores internal tree nodes; every sibling
//! above the leaf level is recomputed on demand by recursively hashing the
//! leaves it covers. Leaves absent from the cache resolve to the all-zero
//! placeholder, the on-chain empty-leaf sentinel.
//!
//! The current root is always fetched live: it changes on every write to
//! the tree, and a stale root turns into a rejected instruction at
//! submission time. Between the fetch here and the submission there is an
//! inherent optimistic-concurrency window; callers submit promptly and
//! rebuild on rejection.

use crate::error::{IndexerError, Result};
use crate::ledger::LedgerRpc;
use crate::merkle::{hash_pair, ZERO_LEAF};
use crate::storage::IndexerStorage;
use crate::topology::{generate_auth_path, node_index_from_leaf_index, PathNode};
use crate::types::{Hash32, LeafProof};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds submission-ready proofs from the leaf hash cache
pub struct ProofBuilder {
    storage: Arc<IndexerStorage>,
    rpc: Arc<dyn LedgerRpc>,
}

impl ProofBuilder {
    /// Create a proof builder over injected collaborators
    pub fn new(storage: Arc<IndexerStorage>, rpc: Arc<dyn LedgerRpc>) -> Self {
        Self { storage, rpc }
    }

    /// Build the authentication path for an entry
    ///
    /// Returns the entry's stored leaf commitment, the sibling hashes
    /// ordered leaf to root (base58, exactly `max_depth - canopy_depth`
    /// of them), and the live root the path was built against.
    pub async fn build_proof(&self, entry_id: &str) -> Result<LeafProof> {
        let entry = self.storage.get_entry(entry_id).await?;
        let account = self.rpc.fetch_tree_account(&entry.tree_id).await?;

        let leaf_node = node_index_from_leaf_index(entry.nonce, account.max_depth);
        let path = generate_auth_path(leaf_node, account.max_depth, account.canopy_depth)?;

        // One batched lookup across every leaf the path touches
        let mut indices = Vec::new();
        for node in &path {
            node.collect_leaf_indices(&mut indices);
        }
        let hashes = self.storage.get_leaf_hashes(&entry.tree_id, &indices).await?;

        let missing = indices.iter().filter(|i| !hashes.contains_key(*i)).count();
        if missing > 0 {
            // Indistinguishable from validly empty leaves; the zero
            // placeholder keeps the proof well-formed either way
            warn!(
                "Proof for {} substitutes the zero placeholder for {} of {} leaves",
                entry_id,
                missing,
                indices.len()
            );
        }

        let siblings: Vec<Hash32> = path.iter().map(|node| resolve_node(node, &hashes)).collect();

        debug!(
            "Built {}-level proof for entry {} (tree {}, nonce {})",
            siblings.len(),
            entry_id,
            entry.tree_id,
            entry.nonce
        );

        Ok(LeafProof {
            data_hash: entry.hash,
            proof: siblings
                .iter()
                .map(|hash| bs58::encode(hash).into_string())
                .collect(),
            root: account.current_root,
            nonce: entry.nonce,
        })
    }
}

/// Resolve one sibling subtree to its hash
///
/// A leaf resolves to its cached commitment or the zero placeholder; an
/// internal node hashes its two resolved children, left first.
fn resolve_node(node: &PathNode, hashes: &HashMap<u64, Hash32>) -> Hash32 {
    match node {
        PathNode::Leaf(index) => hashes.get(index).copied().unwrap_or(ZERO_LEAF),
        PathNode::Pair(left, right) => {
            hash_pair(&resolve_node(left, hashes), &resolve_node(right, hashes))
        }
    }
}

/// Decode a proof's base58 sibling hashes back to bytes
pub fn decode_sibling_hashes(proof: &LeafProof) -> Result<Vec<Hash32>> {
    proof
        .proof
        .iter()
        .map(|encoded| {
            let bytes = bs58::decode(encoded)
                .into_vec()
                .map_err(|e| IndexerError::Decode(format!("invalid proof hash: {}", e)))?;
            let hash: Hash32 = bytes
                .try_into()
                .map_err(|_| IndexerError::Decode("proof hash is not 32 bytes".to_string()))?;
            Ok(hash)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedgerRpc;
    use crate::merkle::{compute_root_from_proof, empty_subtree_root, verify_proof};
    use crate::schema::derive_entry_id;
    use crate::types::{ContentKind, Entry, EntryKind, TreeAccount};
    use tempfile::TempDir;

    fn leaf(byte: u8) -> Hash32 {
        [byte; 32]
    }

    /// Root of a depth-`max_depth` tree over the given occupied leaves,
    /// built level by level with zero padding
    fn naive_root(leaves: &HashMap<u64, Hash32>, max_depth: u32) -> Hash32 {
        let mut level: Vec<Hash32> = (0..(1u64 << max_depth))
            .map(|i| leaves.get(&i).copied().unwrap_or(ZERO_LEAF))
            .collect();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
        }
        level[0]
    }

    fn entry(tree: &str, nonce: u64, hash: Hash32) -> Entry {
        Entry {
            id: derive_entry_id(tree, nonce),
            tree_id: tree.to_string(),
            nonce,
            hash,
            kind: EntryKind::Post,
            content: ContentKind::Text,
            author_id: "author".to_string(),
            title: "title".to_string(),
            body: "body".to_string(),
            uri: "ar://body".to_string(),
            reply_to: String::new(),
            created_at: 0,
            edited_at: None,
        }
    }

    async fn builder_with(
        tree: &str,
        max_depth: u32,
        canopy_depth: u32,
        entries: &[(u64, Hash32)],
    ) -> (TempDir, Arc<MockLedgerRpc>, ProofBuilder) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            IndexerStorage::new(dir.path().to_str().unwrap())
                .await
                .unwrap(),
        );
        for &(nonce, hash) in entries {
            storage.upsert_entry(&entry(tree, nonce, hash)).await.unwrap();
        }

        let occupied: HashMap<u64, Hash32> = entries.iter().copied().collect();
        let rpc = Arc::new(MockLedgerRpc::new());
        rpc.set_tree_account(
            tree,
            TreeAccount {
                max_depth,
                canopy_depth,
                current_root: naive_root(&occupied, max_depth),
            },
        );

        (dir, rpc.clone(), ProofBuilder::new(storage, rpc))
    }

    #[tokio::test]
    async fn depth_three_scenario_matches_expected_siblings() {
        // Capacity 8, leaves 0..2 occupied, proof for nonce 1
        let (h0, h1, h2) = (leaf(0xA0), leaf(0xA1), leaf(0xA2));
        let (_dir, _rpc, builder) =
            builder_with("tree", 3, 0, &[(0, h0), (1, h1), (2, h2)]).await;

        let proof = builder
            .build_proof(&derive_entry_id("tree", 1))
            .await
            .unwrap();
        assert_eq!(proof.data_hash, h1);
        assert_eq!(proof.nonce, 1);

        let siblings = decode_sibling_hashes(&proof).unwrap();
        let empty1 = empty_subtree_root(1);
        assert_eq!(
            siblings,
            vec![
                h0,
                hash_pair(&h2, &ZERO_LEAF),
                hash_pair(&empty1, &empty1),
            ]
        );

        // The path rehashes to the live root
        assert!(verify_proof(&h1, 1, &siblings, &proof.root));
    }

    #[tokio::test]
    async fn proof_length_is_depth_minus_canopy() {
        let (_dir, _rpc, builder) =
            builder_with("tree", 14, 11, &[(0, leaf(1))]).await;

        let proof = builder
            .build_proof(&derive_entry_id("tree", 0))
            .await
            .unwrap();
        assert_eq!(proof.proof.len(), 3);
    }

    #[tokio::test]
    async fn unindexed_leaves_resolve_to_the_zero_ladder() {
        // Only the target leaf is indexed, and it is itself the zero
        // commitment: every sibling must be the empty subtree of its level
        let depth = 5;
        let (_dir, _rpc, builder) =
            builder_with("tree", depth, 0, &[(0, ZERO_LEAF)]).await;

        let proof = builder
            .build_proof(&derive_entry_id("tree", 0))
            .await
            .unwrap();
        let siblings = decode_sibling_hashes(&proof).unwrap();

        for (level, sibling) in siblings.iter().enumerate() {
            assert_eq!(*sibling, empty_subtree_root(level as u32));
        }
        assert_eq!(
            compute_root_from_proof(&ZERO_LEAF, 0, &siblings),
            empty_subtree_root(depth)
        );
        assert_eq!(proof.root, empty_subtree_root(depth));
    }

    #[tokio::test]
    async fn canopy_truncated_proof_reaches_the_cached_subroot() {
        // With a canopy the fold stops below the root; check it lands on
        // the subtree node the on-chain canopy completes from
        let (h0, h3) = (leaf(0xB0), leaf(0xB3));
        let (_dir, _rpc, builder) = builder_with("tree", 4, 2, &[(0, h0), (3, h3)]).await;

        let proof = builder
            .build_proof(&derive_entry_id("tree", 3))
            .await
            .unwrap();
        let siblings = decode_sibling_hashes(&proof).unwrap();
        assert_eq!(siblings.len(), 2);

        let subroot = compute_root_from_proof(&h3, 3, &siblings);
        let expected = hash_pair(
            &hash_pair(&h0, &ZERO_LEAF),
            &hash_pair(&ZERO_LEAF, &h3),
        );
        assert_eq!(subroot, expected);
    }

    #[tokio::test]
    async fn missing_entry_and_missing_tree_are_distinct_errors() {
        let (_dir, rpc, builder) = builder_with("tree", 3, 0, &[(0, leaf(1))]).await;

        assert!(matches!(
            builder.build_proof("unknown-entry").await,
            Err(IndexerError::EntryNotFound(_))
        ));

        // Entry cached, but the tree account is gone from the ledger view
        let _ = rpc;
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            IndexerStorage::new(dir.path().to_str().unwrap())
                .await
                .unwrap(),
        );
        storage
            .upsert_entry(&entry("ghost-tree", 0, leaf(2)))
            .await
            .unwrap();
        let builder = ProofBuilder::new(storage, Arc::new(MockLedgerRpc::new()));
        assert!(matches!(
            builder
                .build_proof(&derive_entry_id("ghost-tree", 0))
                .await,
            Err(IndexerError::TreeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleted_comment_contributes_the_placeholder() {
        let (h0, h1) = (leaf(0xC0), leaf(0xC1));
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            IndexerStorage::new(dir.path().to_str().unwrap())
                .await
                .unwrap(),
        );
        storage.upsert_entry(&entry("tree", 0, h0)).await.unwrap();
        let mut comment = entry("tree", 1, h1);
        comment.kind = EntryKind::Comment;
        comment.content = ContentKind::Comment;
        storage.upsert_entry(&comment).await.unwrap();
        storage.delete_comment(&comment.id).await.unwrap();

        let rpc = Arc::new(MockLedgerRpc::new());
        let occupied: HashMap<u64, Hash32> = [(0, h0)].into_iter().collect();
        rpc.set_tree_account(
            "tree",
            TreeAccount {
                max_depth: 3,
                canopy_depth: 0,
                current_root: naive_root(&occupied, 3),
            },
        );

        let builder = ProofBuilder::new(storage, rpc);
        let proof = builder
            .build_proof(&derive_entry_id("tree", 0))
            .await
            .unwrap();
        let siblings = decode_sibling_hashes(&proof).unwrap();
        // Leaf 1 was hard-deleted, so the first sibling is the placeholder
        assert_eq!(siblings[0], ZERO_LEAF);
        assert!(verify_proof(&h0, 0, &siblings, &proof.root));
    }
}
