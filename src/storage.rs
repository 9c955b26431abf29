//! Indexer cache storage layer using ParityDB
//!
//! The relational cache reconstructed from ledger transactions: forum
//! trees, post and comment rows, awards, and the leaf index the proof
//! builder resolves sibling hashes from. Every mutation is keyed by a
//! deterministic id, so replaying the same transaction is idempotent.

use crate::error::{IndexerError, Result};
use crate::schema::{self, columns};
use crate::types::{Award, Entry, EntryKind, ForumTree, Hash32, TOMBSTONE_MARKER};
use parity_db::{Db, Options};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Resolved reference to an entry row, independent of its kind
///
/// Stored under both the entry id and the (tree, nonce) leaf key so one
/// indexed lookup answers "which row owns this leaf" without probing the
/// post and comment columns blindly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRef {
    pub entry_id: String,
    pub kind: EntryKind,
    pub tree_id: String,
    pub nonce: u64,
}

/// Indexer cache storage
pub struct IndexerStorage {
    db: Db,
}

impl IndexerStorage {
    /// Open or create the cache database
    pub async fn new(db_path: &str) -> Result<Self> {
        let path = Path::new(db_path);
        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }

        let mut opts = Options::with_columns(path, columns::COUNT);
        for column in &mut opts.columns {
            column.btree_index = true;
        }
        let db = Db::open_or_create(&opts)?;

        info!("Indexer storage initialized at {}", db_path);

        Ok(Self { db })
    }

    /// Upsert a forum tree row
    pub async fn put_tree(&self, tree: &ForumTree) -> Result<()> {
        let key = schema::tree_key(&tree.tree_id);
        let value = serde_json::to_vec(tree)?;

        self.db
            .commit(vec![(columns::COL_TREES, key.into_bytes(), Some(value))])?;

        debug!("Stored tree config: {}", tree.tree_id);
        Ok(())
    }

    /// Get a forum tree row
    pub async fn get_tree(&self, tree_id: &str) -> Result<ForumTree> {
        let key = schema::tree_key(tree_id);
        let value = self
            .db
            .get(columns::COL_TREES, key.as_bytes())?
            .ok_or_else(|| IndexerError::TreeNotFound(tree_id.to_string()))?;

        Ok(serde_json::from_slice(&value)?)
    }

    /// Upsert an entry row together with its id and leaf refs
    pub async fn upsert_entry(&self, entry: &Entry) -> Result<()> {
        let (column, row_key) = match entry.kind {
            EntryKind::Post => (columns::COL_POSTS, schema::post_key(&entry.id)),
            EntryKind::Comment => (columns::COL_COMMENTS, schema::comment_key(&entry.id)),
        };
        let row = serde_json::to_vec(entry)?;

        let entry_ref = EntryRef {
            entry_id: entry.id.clone(),
            kind: entry.kind,
            tree_id: entry.tree_id.clone(),
            nonce: entry.nonce,
        };
        let ref_value = serde_json::to_vec(&entry_ref)?;

        self.db.commit(vec![
            (column, row_key.into_bytes(), Some(row)),
            (
                columns::COL_REFS,
                schema::id_ref_key(&entry.id).into_bytes(),
                Some(ref_value.clone()),
            ),
            (
                columns::COL_REFS,
                schema::leaf_ref_key(&entry.tree_id, entry.nonce).into_bytes(),
                Some(ref_value),
            ),
        ])?;

        debug!(
            "Upserted {:?} entry {} (tree {}, nonce {})",
            entry.kind, entry.id, entry.tree_id, entry.nonce
        );
        Ok(())
    }

    /// Resolve an entry id to its ref, if indexed
    pub async fn get_entry_ref(&self, entry_id: &str) -> Result<Option<EntryRef>> {
        let key = schema::id_ref_key(entry_id);
        match self.db.get(columns::COL_REFS, key.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Get an entry row by id, regardless of kind
    pub async fn get_entry(&self, entry_id: &str) -> Result<Entry> {
        let entry_ref = self
            .get_entry_ref(entry_id)
            .await?
            .ok_or_else(|| IndexerError::EntryNotFound(entry_id.to_string()))?;

        self.get_entry_row(&entry_ref)
            .await?
            .ok_or_else(|| IndexerError::EntryNotFound(entry_id.to_string()))
    }

    /// Fetch the row a ref points at, if it still exists
    async fn get_entry_row(&self, entry_ref: &EntryRef) -> Result<Option<Entry>> {
        let (column, key) = match entry_ref.kind {
            EntryKind::Post => (columns::COL_POSTS, schema::post_key(&entry_ref.entry_id)),
            EntryKind::Comment => (
                columns::COL_COMMENTS,
                schema::comment_key(&entry_ref.entry_id),
            ),
        };
        match self.db.get(column, key.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Resolve cached leaf hashes for a batch of leaf positions
    ///
    /// One lookup per position across the union of post and comment rows.
    /// Positions with no ref, or whose row has been deleted, are absent
    /// from the returned map; the proof builder substitutes the zero
    /// placeholder for them.
    pub async fn get_leaf_hashes(
        &self,
        tree_id: &str,
        leaf_indices: &[u64],
    ) -> Result<HashMap<u64, Hash32>> {
        let mut hashes = HashMap::with_capacity(leaf_indices.len());

        for &index in leaf_indices {
            let key = schema::leaf_ref_key(tree_id, index);
            let Some(ref_value) = self.db.get(columns::COL_REFS, key.as_bytes())? else {
                continue;
            };
            let entry_ref: EntryRef = serde_json::from_slice(&ref_value)?;
            if let Some(entry) = self.get_entry_row(&entry_ref).await? {
                hashes.insert(index, entry.hash);
            }
        }

        debug!(
            "Resolved {}/{} leaf hashes for tree {}",
            hashes.len(),
            leaf_indices.len(),
            tree_id
        );
        Ok(hashes)
    }

    /// Tombstone a post row in place
    ///
    /// Content is replaced with the tombstone marker and the stored leaf
    /// commitment becomes the zero sentinel, matching the cleared on-chain
    /// leaf. Id and thread structure survive. Returns false if no post row
    /// exists for the id.
    pub async fn tombstone_post(&self, entry_id: &str) -> Result<bool> {
        let key = schema::post_key(entry_id);
        let Some(value) = self.db.get(columns::COL_POSTS, key.as_bytes())? else {
            return Ok(false);
        };

        let mut entry: Entry = serde_json::from_slice(&value)?;
        entry.body = TOMBSTONE_MARKER.to_string();
        entry.uri = TOMBSTONE_MARKER.to_string();
        entry.title = TOMBSTONE_MARKER.to_string();
        entry.hash = [0u8; 32];
        let row = serde_json::to_vec(&entry)?;

        self.db
            .commit(vec![(columns::COL_POSTS, key.into_bytes(), Some(row))])?;

        debug!("Tombstoned post {}", entry_id);
        Ok(true)
    }

    /// Hard-delete a comment row and its refs
    ///
    /// Returns false if no comment row exists for the id.
    pub async fn delete_comment(&self, entry_id: &str) -> Result<bool> {
        let key = schema::comment_key(entry_id);
        let Some(value) = self.db.get(columns::COL_COMMENTS, key.as_bytes())? else {
            return Ok(false);
        };
        let entry: Entry = serde_json::from_slice(&value)?;

        self.db.commit(vec![
            (columns::COL_COMMENTS, key.into_bytes(), None),
            (
                columns::COL_REFS,
                schema::id_ref_key(entry_id).into_bytes(),
                None,
            ),
            (
                columns::COL_REFS,
                schema::leaf_ref_key(&entry.tree_id, entry.nonce).into_bytes(),
                None,
            ),
        ])?;

        debug!("Deleted comment {}", entry_id);
        Ok(true)
    }

    /// Upsert an award row
    pub async fn put_award(&self, award: &Award) -> Result<()> {
        let key = schema::award_key(&award.id);
        let value = serde_json::to_vec(award)?;

        self.db
            .commit(vec![(columns::COL_AWARDS, key.into_bytes(), Some(value))])?;

        debug!("Stored award {} for entry {}", award.id, award.entry_id);
        Ok(())
    }

    /// Get an award row by id
    pub async fn get_award(&self, award_id: &str) -> Result<Option<Award>> {
        let key = schema::award_key(award_id);
        match self.db.get(columns::COL_AWARDS, key.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// List indexed entries of a tree in leaf order
    pub async fn entries_for_tree(&self, tree_id: &str, limit: usize) -> Result<Vec<Entry>> {
        let prefix = format!("{}{}:", schema::keys::LEAF_REF_PREFIX, tree_id);
        let prefix_bytes = prefix.as_bytes();
        let mut entries = Vec::new();

        let mut iter = self.db.iter(columns::COL_REFS)?;
        iter.seek(prefix_bytes)?;
        while let Some((key, value)) = iter.next()? {
            if !key.starts_with(prefix_bytes) {
                break;
            }
            let entry_ref: EntryRef = serde_json::from_slice(&value)?;
            if let Some(entry) = self.get_entry_row(&entry_ref).await? {
                entries.push(entry);
                if entries.len() >= limit {
                    break;
                }
            }
        }

        debug!("Listed {} entries for tree {}", entries.len(), tree_id);
        Ok(entries)
    }

    /// Count indexed leaf refs for a tree
    pub async fn count_tree_leaves(&self, tree_id: &str) -> Result<u64> {
        let prefix = format!("{}{}:", schema::keys::LEAF_REF_PREFIX, tree_id);
        let prefix_bytes = prefix.as_bytes();
        let mut count = 0u64;

        let mut iter = self.db.iter(columns::COL_REFS)?;
        iter.seek(prefix_bytes)?;
        while let Some((key, _value)) = iter.next()? {
            if !key.starts_with(prefix_bytes) {
                break;
            }
            count += 1;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::derive_entry_id;
    use crate::types::ContentKind;
    use tempfile::TempDir;

    fn entry(tree: &str, nonce: u64, kind: EntryKind, hash_byte: u8) -> Entry {
        Entry {
            id: derive_entry_id(tree, nonce),
            tree_id: tree.to_string(),
            nonce,
            hash: [hash_byte; 32],
            kind,
            content: match kind {
                EntryKind::Post => ContentKind::Text,
                EntryKind::Comment => ContentKind::Comment,
            },
            author_id: "author".to_string(),
            title: "title".to_string(),
            body: "body".to_string(),
            uri: "ar://body".to_string(),
            reply_to: String::new(),
            created_at: 1_700_000_000,
            edited_at: None,
        }
    }

    async fn open_storage() -> (TempDir, IndexerStorage) {
        let dir = TempDir::new().unwrap();
        let storage = IndexerStorage::new(dir.path().to_str().unwrap())
            .await
            .unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let (_dir, storage) = open_storage().await;
        let post = entry("tree", 0, EntryKind::Post, 1);

        storage.upsert_entry(&post).await.unwrap();
        storage.upsert_entry(&post).await.unwrap();

        assert_eq!(storage.count_tree_leaves("tree").await.unwrap(), 1);
        assert_eq!(storage.get_entry(&post.id).await.unwrap(), post);
    }

    #[tokio::test]
    async fn leaf_batch_unions_posts_and_comments() {
        let (_dir, storage) = open_storage().await;
        storage
            .upsert_entry(&entry("tree", 0, EntryKind::Post, 1))
            .await
            .unwrap();
        storage
            .upsert_entry(&entry("tree", 1, EntryKind::Comment, 2))
            .await
            .unwrap();

        let hashes = storage
            .get_leaf_hashes("tree", &[0, 1, 2])
            .await
            .unwrap();
        assert_eq!(hashes.get(&0), Some(&[1u8; 32]));
        assert_eq!(hashes.get(&1), Some(&[2u8; 32]));
        // Never indexed: absent, the caller zero-fills
        assert!(!hashes.contains_key(&2));
    }

    #[tokio::test]
    async fn tombstone_keeps_row_and_zeroes_hash() {
        let (_dir, storage) = open_storage().await;
        let post = entry("tree", 0, EntryKind::Post, 1);
        storage.upsert_entry(&post).await.unwrap();

        assert!(storage.tombstone_post(&post.id).await.unwrap());

        let row = storage.get_entry(&post.id).await.unwrap();
        assert!(row.is_tombstone());
        assert_eq!(row.body, TOMBSTONE_MARKER);
        assert_eq!(row.hash, [0u8; 32]);
        // Leaf still resolves, now to the zero commitment
        let hashes = storage.get_leaf_hashes("tree", &[0]).await.unwrap();
        assert_eq!(hashes.get(&0), Some(&[0u8; 32]));
    }

    #[tokio::test]
    async fn comment_delete_removes_row_and_refs() {
        let (_dir, storage) = open_storage().await;
        let comment = entry("tree", 3, EntryKind::Comment, 2);
        storage.upsert_entry(&comment).await.unwrap();

        assert!(storage.delete_comment(&comment.id).await.unwrap());
        assert!(storage.get_entry(&comment.id).await.is_err());
        assert!(storage.get_entry_ref(&comment.id).await.unwrap().is_none());

        let hashes = storage.get_leaf_hashes("tree", &[3]).await.unwrap();
        assert!(hashes.is_empty());

        // Replayed delete tolerates the missing row
        assert!(!storage.delete_comment(&comment.id).await.unwrap());
    }

    #[tokio::test]
    async fn tree_round_trip() {
        let (_dir, storage) = open_storage().await;
        let tree = ForumTree {
            tree_id: "tree".to_string(),
            max_depth: 14,
            buffer_size: 64,
            canopy_depth: 11,
            restricted: false,
            created_at: 1_700_000_000,
        };
        storage.put_tree(&tree).await.unwrap();
        assert_eq!(storage.get_tree("tree").await.unwrap(), tree);
        assert!(matches!(
            storage.get_tree("missing").await,
            Err(IndexerError::TreeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn entries_listed_in_leaf_order() {
        let (_dir, storage) = open_storage().await;
        for nonce in [5u64, 0, 9, 2] {
            storage
                .upsert_entry(&entry("tree", nonce, EntryKind::Post, nonce as u8))
                .await
                .unwrap();
        }

        let listed = storage.entries_for_tree("tree", 10).await.unwrap();
        let nonces: Vec<u64> = listed.iter().map(|e| e.nonce).collect();
        assert_eq!(nonces, vec![0, 2, 5, 9]);
    }
}
