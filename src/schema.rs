//! Grove indexer ParityDB schema
//!
//! This module documents the ParityDB layout used by the indexer's
//! relational cache and provides the key builders for it.

/// ParityDB schema for the Grove indexer
///
/// # Column Families
///
/// ## Posts
/// - Column: `COL_POSTS`
/// - Key: `post:{entry_id}`
/// - Value: Serialized Entry (JSON)
/// - Purpose: Post rows; tombstoned in place on delete
///
/// ## Comments
/// - Column: `COL_COMMENTS`
/// - Key: `comment:{entry_id}`
/// - Value: Serialized Entry (JSON)
/// - Purpose: Comment rows; removed entirely on delete
///
/// ## Trees
/// - Column: `COL_TREES`
/// - Key: `tree:{tree_id}`
/// - Value: Serialized ForumTree (JSON)
/// - Purpose: Forum tree configuration indexed from `initForum`
///
/// ## Awards
/// - Column: `COL_AWARDS`
/// - Key: `award:{award_id}`
/// - Value: Serialized Award (JSON)
///
/// ## Refs
/// - Column: `COL_REFS`
/// - Key: `id:{entry_id}` and `leaf:{tree_id}:{nonce, zero-padded}`
/// - Value: Serialized EntryRef (JSON)
/// - Purpose: One indexed lookup resolving an entry id or a leaf position
///   to (entry id, kind, tree, nonce), so callers never have to probe the
///   post and comment columns blindly. Posts and comments share the tree's
///   leaf address space but live in separate columns; this is the union
///   over both.
///
/// # Leaf resolution
///
/// A leaf lookup that finds no ref, or a ref whose row is gone (deleted
/// comment), resolves to the all-zero placeholder hash - the on-chain
/// empty-leaf sentinel.
pub mod columns {
    pub const COL_POSTS: u8 = 0;
    pub const COL_COMMENTS: u8 = 1;
    pub const COL_TREES: u8 = 2;
    pub const COL_AWARDS: u8 = 3;
    pub const COL_REFS: u8 = 4;
    pub const COL_METADATA: u8 = 5;

    /// Total number of columns
    pub const COUNT: u8 = 6;
}

/// Key prefix constants
pub mod keys {
    pub const POST_PREFIX: &str = "post:";
    pub const COMMENT_PREFIX: &str = "comment:";
    pub const TREE_PREFIX: &str = "tree:";
    pub const AWARD_PREFIX: &str = "award:";
    pub const ID_REF_PREFIX: &str = "id:";
    pub const LEAF_REF_PREFIX: &str = "leaf:";
}

/// Build post row key
pub fn post_key(entry_id: &str) -> String {
    format!("{}{}", keys::POST_PREFIX, entry_id)
}

/// Build comment row key
pub fn comment_key(entry_id: &str) -> String {
    format!("{}{}", keys::COMMENT_PREFIX, entry_id)
}

/// Build tree row key
pub fn tree_key(tree_id: &str) -> String {
    format!("{}{}", keys::TREE_PREFIX, tree_id)
}

/// Build award row key
pub fn award_key(award_id: &str) -> String {
    format!("{}{}", keys::AWARD_PREFIX, award_id)
}

/// Build id ref key
pub fn id_ref_key(entry_id: &str) -> String {
    format!("{}{}", keys::ID_REF_PREFIX, entry_id)
}

/// Build leaf ref key
///
/// The nonce is zero-padded so leaf keys within a tree sort numerically
/// under lexicographic iteration.
pub fn leaf_ref_key(tree_id: &str, nonce: u64) -> String {
    format!("{}{}:{:020}", keys::LEAF_REF_PREFIX, tree_id, nonce)
}

/// Derive the deterministic entry id for a leaf position
///
/// Stands in for the on-chain program-derived address: a fixed seed layout
/// hashed with blake3 and base58-encoded. The same (tree, nonce) always
/// derives the same id, which is what makes cache mutations replay-safe.
pub fn derive_entry_id(tree_id: &str, nonce: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"grove:entry");
    hasher.update(tree_id.as_bytes());
    hasher.update(&nonce.to_le_bytes());
    bs58::encode(hasher.finalize().as_bytes()).into_string()
}

/// Derive the deterministic award id for a grant
pub fn derive_award_id(tree_id: &str, nonce: u64, kind: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"grove:award");
    hasher.update(tree_id.as_bytes());
    hasher.update(&nonce.to_le_bytes());
    hasher.update(kind.as_bytes());
    bs58::encode(hasher.finalize().as_bytes()).into_string()
}
