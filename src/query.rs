//! Entry query operations

use crate::error::Result;
use crate::proof::ProofBuilder;
use crate::storage::IndexerStorage;
use crate::types::{Entry, LeafProof};
use tracing::debug;

/// Query an entry together with a freshly built proof
///
/// The proof is rebuilt on every call: the tree root moves with every
/// write, so a stored proof would already be stale.
pub async fn entry_with_proof(
    storage: &IndexerStorage,
    builder: &ProofBuilder,
    entry_id: &str,
) -> Result<(Entry, LeafProof)> {
    debug!("Querying entry with proof: {}", entry_id);
    let entry = storage.get_entry(entry_id).await?;
    let proof = builder.build_proof(entry_id).await?;

    Ok((entry, proof))
}

/// Query a tree's indexed entries in leaf order
pub async fn tree_entries(
    storage: &IndexerStorage,
    tree_id: &str,
    limit: usize,
) -> Result<Vec<Entry>> {
    debug!("Querying entries for tree: {}", tree_id);
    storage.entries_for_tree(tree_id, limit).await
}

/// Query the replies to an entry, in leaf order
pub async fn replies_to(
    storage: &IndexerStorage,
    tree_id: &str,
    entry_id: &str,
    limit: usize,
) -> Result<Vec<Entry>> {
    let entries = storage.entries_for_tree(tree_id, usize::MAX).await?;
    Ok(entries
        .into_iter()
        .filter(|entry| entry.reply_to == entry_id)
        .take(limit)
        .collect())
}
