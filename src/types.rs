//! Grove indexer types

use serde::{Deserialize, Serialize};

/// 32-byte digest used for leaf hashes, internal node hashes, and roots
pub type Hash32 = [u8; 32];

/// Kind of a forum entry sharing the tree's leaf address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Top-level post (text, image, or link)
    Post,
    /// Reply to an existing entry
    Comment,
}

/// Content variant carried by an `addEntry` instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Image,
    Link,
    Comment,
}

impl ContentKind {
    /// Entry kind this content variant maps to
    pub fn entry_kind(self) -> EntryKind {
        match self {
            ContentKind::Comment => EntryKind::Comment,
            _ => EntryKind::Post,
        }
    }
}

/// A forum entry stored as one compressed leaf of a merkle tree
///
/// The `hash` field is the leaf's current on-chain commitment, captured
/// verbatim from the ledger's log event when the entry was indexed. It is
/// never recomputed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Deterministic id derived from (tree address, nonce), base58
    pub id: String,
    /// Address of the tree this entry belongs to
    pub tree_id: String,
    /// Leaf position assigned at creation, never reused
    pub nonce: u64,
    /// Current leaf commitment - hex string for serialization
    #[serde(
        serialize_with = "serialize_hash",
        deserialize_with = "deserialize_hash"
    )]
    pub hash: Hash32,
    /// Post or comment
    pub kind: EntryKind,
    /// Content variant at creation time
    pub content: ContentKind,
    /// Author address
    pub author_id: String,
    /// Post title (empty for comments)
    pub title: String,
    /// Body text, dereferenced from the content URI
    pub body: String,
    /// Content URI as carried by the instruction
    pub uri: String,
    /// Id of the entry this comment replies to (empty for posts)
    pub reply_to: String,
    /// Creation timestamp (unix seconds, from the leaf event)
    pub created_at: i64,
    /// Last edit timestamp, if ever edited
    pub edited_at: Option<i64>,
}

impl Entry {
    /// Whether this entry has been tombstoned by a delete
    pub fn is_tombstone(&self) -> bool {
        self.body == TOMBSTONE_MARKER && self.uri == TOMBSTONE_MARKER
    }
}

/// Marker written into tombstoned post content
pub const TOMBSTONE_MARKER: &str = "[deleted]";

/// A forum's merkle tree configuration, as indexed from `initForum`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumTree {
    /// Tree account address
    pub tree_id: String,
    /// Tree depth; leaf capacity is 2^max_depth
    pub max_depth: u32,
    /// Concurrency buffer size
    pub buffer_size: u32,
    /// Upper tree levels cached on-chain, shortening proofs
    pub canopy_depth: u32,
    /// Whether posting is restricted to a gated set of authors
    pub restricted: bool,
    /// Creation timestamp (unix seconds)
    pub created_at: i64,
}

impl ForumTree {
    /// Leaf capacity of the tree
    pub fn capacity(&self) -> u64 {
        1u64 << self.max_depth
    }
}

/// Live tree account state fetched from the ledger RPC
///
/// The root changes on every write to the tree, so this is always read
/// fresh and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeAccount {
    /// Tree depth
    pub max_depth: u32,
    /// Canopy depth
    pub canopy_depth: u32,
    /// Current root - hex string for serialization
    #[serde(
        serialize_with = "serialize_hash",
        deserialize_with = "deserialize_hash"
    )]
    pub current_root: Hash32,
}

/// Authentication path for one leaf, ready for instruction submission
///
/// `proof` holds base58-encoded 32-byte sibling hashes ordered leaf to
/// root; its length is always `max_depth - canopy_depth` for the tree the
/// entry lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafProof {
    /// The entry's stored leaf commitment - hex string for serialization
    #[serde(
        serialize_with = "serialize_hash",
        deserialize_with = "deserialize_hash"
    )]
    pub data_hash: Hash32,
    /// Sibling hashes from leaf to root, base58
    pub proof: Vec<String>,
    /// Root the proof was built against - hex string for serialization
    #[serde(
        serialize_with = "serialize_hash",
        deserialize_with = "deserialize_hash"
    )]
    pub root: Hash32,
    /// Leaf position the proof authenticates
    pub nonce: u64,
}

/// An award granted to an entry, as indexed from `giveAward`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    /// Deterministic id derived from (tree address, nonce, kind), base58
    pub id: String,
    /// Entry the award was granted to
    pub entry_id: String,
    /// Granting address
    pub giver: String,
    /// Award kind identifier
    pub kind: String,
    /// Amount attached to the grant
    pub amount: u64,
    /// Grant timestamp (unix seconds)
    pub created_at: i64,
}

/// Grove indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Database path
    pub db_path: String,
    /// Forum program id whose instructions the parser recognizes
    pub program_id: String,
    /// Ledger RPC endpoint
    pub rpc_url: String,
    /// Timeout for ledger RPC requests in milliseconds
    pub rpc_timeout_ms: u64,
    /// Transport retries for tree account fetches
    pub rpc_retries: u32,
    /// Timeout for content URI fetches in milliseconds
    pub content_timeout_ms: u64,
    /// Maximum proof rebuild attempts on root mismatch
    pub max_submit_attempts: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            db_path: "data/grove-indexer".to_string(),
            program_id: String::new(),
            rpc_url: "http://127.0.0.1:8899".to_string(),
            rpc_timeout_ms: 10_000,
            rpc_retries: 2,
            content_timeout_ms: 5_000,
            max_submit_attempts: 3,
        }
    }
}

/// Serialize 32-byte hash as hex string
pub(crate) fn serialize_hash<S>(hash: &Hash32, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&hex::encode(hash))
}

/// Deserialize 32-byte hash from hex string
pub(crate) fn deserialize_hash<'de, D>(deserializer: D) -> Result<Hash32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
    if bytes.len() != 32 {
        return Err(serde::de::Error::custom("Invalid hash length"));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}
