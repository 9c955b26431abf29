//! Ledger instruction parsing
//!
//! Decodes raw forum-program instructions and their paired log events back
//! into cache rows. Dispatch is stateless: program id, then the 8-byte
//! discriminator at the head of the instruction data, then the payload
//! schema for that instruction. Unrecognized programs and discriminators
//! are skipped silently so new instruction types never crash the indexer;
//! a recognized instruction that fails to decode is an error for that
//! instruction alone.
//!
//! # Wire format
//!
//! The upstream webhook delivers decoded transactions with base58
//! instruction data. Positional contracts with the ledger runtime:
//!
//! - instruction accounts are `[authority, tree, ..]`
//! - the canonical leaf event always rides the FIRST inner instruction
//! - discriminators are `sha256("global:{name}")[..8]` for instructions
//!   and `sha256("event:{name}")[..8]` for events

use crate::error::{IndexerError, Result};
use crate::schema::{derive_award_id, derive_entry_id};
use crate::storage::IndexerStorage;
use crate::types::{Award, ContentKind, Entry, EntryKind, ForumTree, Hash32};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decoded transaction as delivered by the upstream webhook
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedTransaction {
    pub signature: String,
    pub block_time: i64,
    pub instructions: Vec<DecodedInstruction>,
}

/// One decoded instruction of a transaction
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedInstruction {
    pub program_id: String,
    pub accounts: Vec<String>,
    /// Instruction data, base58
    pub data: String,
    #[serde(default)]
    pub inner_instructions: Vec<InnerInstruction>,
}

/// Inner instruction carrying log/event data
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InnerInstruction {
    /// Event data, base58
    pub data: String,
}

/// What a parsed instruction did to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    InitForum { tree_id: String },
    AddEntry { entry_id: String },
    DeleteEntry { entry_id: String },
    GiveAward { award_id: String },
    /// Foreign program or unknown discriminator
    Skipped,
}

/// Fetches body text for a content URI
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_text(&self, uri: &str) -> Result<String>;
}

/// HTTP content fetcher with a bounded request timeout
pub struct HttpContentFetcher {
    client: reqwest::Client,
}

impl HttpContentFetcher {
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| IndexerError::ContentFetch(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch_text(&self, uri: &str) -> Result<String> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| IndexerError::ContentFetch(e.to_string()))?;
        response
            .text()
            .await
            .map_err(|e| IndexerError::ContentFetch(e.to_string()))
    }
}

/// Instruction names recognized by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForumInstruction {
    InitForum,
    AddEntry,
    DeleteEntry,
    GiveAward,
}

/// Derive an instruction discriminator from its name
fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{}", name).as_bytes());
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&digest[..8]);
    disc
}

/// Derive an event discriminator from its name
fn event_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("event:{}", name).as_bytes());
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&digest[..8]);
    disc
}

/// Precomputed discriminator table
struct InstructionRegistry {
    table: Vec<([u8; 8], ForumInstruction)>,
    leaf_event: [u8; 8],
}

impl InstructionRegistry {
    fn new() -> Self {
        Self {
            table: vec![
                (instruction_discriminator("init_forum"), ForumInstruction::InitForum),
                (instruction_discriminator("add_entry"), ForumInstruction::AddEntry),
                (
                    instruction_discriminator("delete_entry"),
                    ForumInstruction::DeleteEntry,
                ),
                (instruction_discriminator("give_award"), ForumInstruction::GiveAward),
            ],
            leaf_event: event_discriminator("LeafRecord"),
        }
    }

    fn lookup(&self, disc: &[u8]) -> Option<ForumInstruction> {
        self.table
            .iter()
            .find(|(known, _)| known == disc)
            .map(|(_, instruction)| *instruction)
    }
}

/// Canonical leaf schema recovered from the paired log event
#[derive(Debug, Clone, PartialEq, Eq)]
struct LeafEvent {
    entry_id: String,
    author: String,
    created_at: i64,
    edited_at: i64,
    nonce: u64,
    hash: Hash32,
}

/// Cursor over instruction data with bounds-checked reads
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(|| {
            IndexerError::Decode("length overflow".to_string())
        })?;
        if end > self.data.len() {
            return Err(IndexerError::Decode(format!(
                "truncated payload: need {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.data.len() - self.pos
            )));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_hash(&mut self) -> Result<Hash32> {
        let bytes = self.take(32)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(bytes);
        Ok(hash)
    }

    /// Length-prefixed UTF-8 string (u32 little-endian length)
    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| IndexerError::Decode(format!("invalid utf-8 string: {}", e)))
    }
}

/// Transaction parser maintaining the relational cache
pub struct TransactionParser {
    storage: Arc<IndexerStorage>,
    fetcher: Arc<dyn ContentFetcher>,
    program_id: String,
    registry: InstructionRegistry,
}

impl TransactionParser {
    pub fn new(
        storage: Arc<IndexerStorage>,
        fetcher: Arc<dyn ContentFetcher>,
        program_id: &str,
    ) -> Self {
        Self {
            storage,
            fetcher,
            program_id: program_id.to_string(),
            registry: InstructionRegistry::new(),
        }
    }

    /// Parse one instruction and apply its cache mutation
    pub async fn parse_instruction(
        &self,
        instruction: &DecodedInstruction,
        block_time: i64,
    ) -> Result<ParseOutcome> {
        if instruction.program_id != self.program_id {
            return Ok(ParseOutcome::Skipped);
        }

        let data = decode_base58(&instruction.data)?;
        if data.len() < 8 {
            return Err(IndexerError::Decode(format!(
                "instruction data too short: {} bytes",
                data.len()
            )));
        }

        let Some(kind) = self.registry.lookup(&data[..8]) else {
            debug!(
                "Skipping unknown discriminator {} for program {}",
                hex::encode(&data[..8]),
                instruction.program_id
            );
            return Ok(ParseOutcome::Skipped);
        };

        match kind {
            ForumInstruction::InitForum => {
                self.apply_init_forum(instruction, &data[8..], block_time).await
            }
            ForumInstruction::AddEntry => {
                self.apply_add_entry(instruction, &data[8..]).await
            }
            ForumInstruction::DeleteEntry => {
                self.apply_delete_entry(instruction, &data).await
            }
            ForumInstruction::GiveAward => {
                self.apply_give_award(instruction, &data[8..], block_time).await
            }
        }
    }

    /// `init_forum`: tree config from the freshly created config account
    async fn apply_init_forum(
        &self,
        instruction: &DecodedInstruction,
        payload: &[u8],
        block_time: i64,
    ) -> Result<ParseOutcome> {
        let tree_id = tree_account(instruction)?;
        let mut cursor = Cursor::new(payload);
        let max_depth = cursor.read_u32()?;
        let buffer_size = cursor.read_u32()?;
        let canopy_depth = cursor.read_u32()?;
        let restricted = cursor.read_u8()? != 0;

        if canopy_depth >= max_depth {
            return Err(IndexerError::InvalidTreeConfig(format!(
                "canopy depth {} must be below max depth {}",
                canopy_depth, max_depth
            )));
        }

        let tree = ForumTree {
            tree_id: tree_id.clone(),
            max_depth,
            buffer_size,
            canopy_depth,
            restricted,
            created_at: block_time,
        };
        self.storage.put_tree(&tree).await?;

        debug!("Indexed forum tree {} (depth {})", tree_id, max_depth);
        Ok(ParseOutcome::InitForum { tree_id })
    }

    /// `add_entry`: typed payload plus the canonical leaf event
    async fn apply_add_entry(
        &self,
        instruction: &DecodedInstruction,
        payload: &[u8],
    ) -> Result<ParseOutcome> {
        let tree_id = tree_account(instruction)?;

        let mut cursor = Cursor::new(payload);
        let content = match cursor.read_u8()? {
            0 => ContentKind::Text,
            1 => ContentKind::Image,
            2 => ContentKind::Link,
            3 => ContentKind::Comment,
            tag => {
                return Err(IndexerError::Decode(format!(
                    "unknown entry content tag {}",
                    tag
                )))
            }
        };
        let title = cursor.read_string()?;
        let uri = cursor.read_string()?;
        let reply_to = cursor.read_string()?;

        // Nonce and hash come verbatim from the event, never recomputed
        let event = self.decode_leaf_event(instruction)?;

        let body = if uri.is_empty() || !matches!(content, ContentKind::Text | ContentKind::Comment)
        {
            String::new()
        } else {
            match self.fetcher.fetch_text(&uri).await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Content fetch for {} failed: {}", uri, e);
                    String::new()
                }
            }
        };

        let entry = Entry {
            id: event.entry_id.clone(),
            tree_id,
            nonce: event.nonce,
            hash: event.hash,
            kind: content.entry_kind(),
            content,
            author_id: event.author,
            title,
            body,
            uri,
            reply_to,
            created_at: event.created_at,
            edited_at: (event.edited_at > 0).then_some(event.edited_at),
        };
        self.storage.upsert_entry(&entry).await?;

        debug!(
            "Indexed {:?} entry {} at nonce {}",
            entry.kind, entry.id, entry.nonce
        );
        Ok(ParseOutcome::AddEntry {
            entry_id: event.entry_id,
        })
    }

    /// `delete_entry`: leaf index rides the trailing 4 bytes of the data
    async fn apply_delete_entry(
        &self,
        instruction: &DecodedInstruction,
        data: &[u8],
    ) -> Result<ParseOutcome> {
        let tree_id = tree_account(instruction)?;
        if data.len() < 12 {
            return Err(IndexerError::Decode(format!(
                "delete payload too short: {} bytes",
                data.len()
            )));
        }
        let tail: [u8; 4] = data[data.len() - 4..].try_into().unwrap();
        let leaf_index = u32::from_le_bytes(tail) as u64;

        let entry_id = derive_entry_id(&tree_id, leaf_index);

        // Exactly one of these applies for an indexed entry; both missing
        // means the delete raced a replay or the entry was never indexed
        let applied = match self.storage.get_entry_ref(&entry_id).await? {
            Some(entry_ref) => match entry_ref.kind {
                EntryKind::Post => self.storage.tombstone_post(&entry_id).await?,
                EntryKind::Comment => self.storage.delete_comment(&entry_id).await?,
            },
            None => false,
        };

        if !applied {
            warn!(
                "Delete for tree {} leaf {} matched no cached entry",
                tree_id, leaf_index
            );
        }

        Ok(ParseOutcome::DeleteEntry { entry_id })
    }

    /// `give_award`: decode and upsert against the award table
    async fn apply_give_award(
        &self,
        instruction: &DecodedInstruction,
        payload: &[u8],
        block_time: i64,
    ) -> Result<ParseOutcome> {
        let tree_id = tree_account(instruction)?;
        let giver = instruction
            .accounts
            .first()
            .cloned()
            .ok_or_else(|| IndexerError::Decode("missing authority account".to_string()))?;

        let mut cursor = Cursor::new(payload);
        let kind = cursor.read_string()?;
        let amount = cursor.read_u64()?;
        let leaf_index = cursor.read_u32()? as u64;

        let entry_id = derive_entry_id(&tree_id, leaf_index);
        let award = Award {
            id: derive_award_id(&tree_id, leaf_index, &kind),
            entry_id,
            giver,
            kind,
            amount,
            created_at: block_time,
        };
        self.storage.put_award(&award).await?;

        Ok(ParseOutcome::GiveAward { award_id: award.id })
    }

    /// Decode the canonical leaf event from the first inner instruction
    ///
    /// The noop/log instruction is always the first inner instruction;
    /// this is a positional contract with the ledger runtime and cannot be
    /// verified independently here.
    fn decode_leaf_event(&self, instruction: &DecodedInstruction) -> Result<LeafEvent> {
        let inner = instruction
            .inner_instructions
            .first()
            .ok_or_else(|| IndexerError::Decode("missing leaf event instruction".to_string()))?;

        let data = decode_base58(&inner.data)?;
        if data.len() < 8 {
            return Err(IndexerError::Decode("event data too short".to_string()));
        }
        if data[..8] != self.registry.leaf_event {
            return Err(IndexerError::Decode(format!(
                "unexpected event discriminator {}",
                hex::encode(&data[..8])
            )));
        }

        let mut cursor = Cursor::new(&data[8..]);
        Ok(LeafEvent {
            entry_id: cursor.read_string()?,
            author: cursor.read_string()?,
            created_at: cursor.read_i64()?,
            edited_at: cursor.read_i64()?,
            nonce: cursor.read_u64()?,
            hash: cursor.read_hash()?,
        })
    }
}

/// Tree account from the instruction's positional account list
fn tree_account(instruction: &DecodedInstruction) -> Result<String> {
    instruction
        .accounts
        .get(1)
        .cloned()
        .ok_or_else(|| IndexerError::Decode("missing tree account".to_string()))
}

fn decode_base58(encoded: &str) -> Result<Vec<u8>> {
    bs58::decode(encoded)
        .into_vec()
        .map_err(|e| IndexerError::Decode(format!("invalid base58 data: {}", e)))
}
