//! Grove Indexer - forum state over a compressed ledger
//!
//! A forum's posts and comments live as leaves of an on-chain concurrent
//! merkle tree instead of as individual accounts. This crate maintains the
//! off-chain relational cache reconstructed from the ledger's transaction
//! stream and rebuilds the merkle authentication paths that state-changing
//! instructions (delete, award grant) must present against the current
//! root.
//!
//! # Architecture
//!
//! ```text
//! Ledger transactions (webhook)
//!     ↓
//! Transaction Parser
//!     ├─ Decode instruction + leaf event
//!     └─ Upsert cache rows (trees, posts, comments, awards)
//!     ↓
//! Leaf Hash Cache (ParityDB)
//!     ⇅
//! Proof Builder
//!     ├─ Fetch live root from ledger RPC
//!     ├─ Enumerate authentication path
//!     └─ Resolve sibling hashes from cached leaves
//!     ↓
//! Submission Helpers → new ledger transaction (re-enters the parser)
//! ```
//!
//! # Proof flow
//!
//! ```text
//! Entry id
//!     ↓
//! Cache lookup: (tree, nonce, leaf hash)
//!     ↓
//! Live tree account: max depth, canopy depth, current root
//!     ↓
//! Auth path: one sibling subtree per uncached level
//!     ├─ Cached leaf → its commitment
//!     ├─ Absent leaf → zero placeholder
//!     └─ Internal node → recursive pair hash
//!     ↓
//! Proof: sibling hashes leaf→root, length = max depth - canopy depth
//! ```

pub mod error;
pub mod ingest;
pub mod ledger;
pub mod merkle;
pub mod parser;
pub mod proof;
pub mod query;
pub mod schema;
pub mod storage;
pub mod submit;
pub mod topology;
pub mod types;

pub use error::{IndexerError, Result};
pub use ingest::{IngestReport, IngestStats, TransactionIngestor};
pub use ledger::{HttpLedgerRpc, LedgerRpc, MockLedgerRpc};
pub use parser::{
    ContentFetcher, DecodedInstruction, DecodedTransaction, HttpContentFetcher, InnerInstruction,
    ParseOutcome, TransactionParser,
};
pub use proof::ProofBuilder;
pub use storage::IndexerStorage;
pub use submit::{LedgerInstruction, SubmissionHelper, Submitter};
pub use types::{
    Award, ContentKind, Entry, EntryKind, ForumTree, Hash32, IndexerConfig, LeafProof, TreeAccount,
};

use std::sync::Arc;
use tracing::info;

/// Grove indexer service
///
/// Wires the cache, parser, proof builder, and submission helper over
/// explicitly injected collaborators. Nothing here holds module-global
/// clients; construct one instance per service (or per test, with the
/// mock collaborators).
pub struct GroveIndexer {
    storage: Arc<IndexerStorage>,
    ingestor: ingest::TransactionIngestor,
    builder: proof::ProofBuilder,
    submission: submit::SubmissionHelper,
}

impl GroveIndexer {
    /// Create a new indexer service
    pub async fn new(
        config: &IndexerConfig,
        rpc: Arc<dyn LedgerRpc>,
        fetcher: Arc<dyn ContentFetcher>,
        submitter: Arc<dyn Submitter>,
    ) -> Result<Self> {
        info!("Initializing Grove indexer at {}", config.db_path);

        let storage = Arc::new(IndexerStorage::new(&config.db_path).await?);
        let parser =
            TransactionParser::new(storage.clone(), fetcher, &config.program_id);
        let ingestor = ingest::TransactionIngestor::new(parser);
        let builder = proof::ProofBuilder::new(storage.clone(), rpc.clone());
        let submission = submit::SubmissionHelper::new(
            storage.clone(),
            rpc,
            submitter,
            &config.program_id,
            config.max_submit_attempts,
        );

        Ok(Self {
            storage,
            ingestor,
            builder,
            submission,
        })
    }

    /// Apply one webhook-delivered transaction to the cache
    pub async fn process_transaction(&self, tx: &DecodedTransaction) -> Result<IngestReport> {
        self.ingestor.process_transaction(tx).await
    }

    /// Apply a batch of transactions in delivery order
    pub async fn process_batch(&self, txs: &[DecodedTransaction]) -> Result<Vec<IngestReport>> {
        self.ingestor.process_batch(txs).await
    }

    /// Build the authentication path for an entry
    pub async fn build_proof(&self, entry_id: &str) -> Result<LeafProof> {
        self.builder.build_proof(entry_id).await
    }

    /// Query an entry together with a freshly built proof
    pub async fn entry_with_proof(&self, entry_id: &str) -> Result<(Entry, LeafProof)> {
        query::entry_with_proof(&self.storage, &self.builder, entry_id).await
    }

    /// Query a tree's indexed entries in leaf order
    pub async fn tree_entries(&self, tree_id: &str, limit: usize) -> Result<Vec<Entry>> {
        query::tree_entries(&self.storage, tree_id, limit).await
    }

    /// Query the replies to an entry
    pub async fn replies_to(
        &self,
        tree_id: &str,
        entry_id: &str,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        query::replies_to(&self.storage, tree_id, entry_id, limit).await
    }

    /// Get a forum tree's indexed configuration
    pub async fn get_tree(&self, tree_id: &str) -> Result<ForumTree> {
        self.storage.get_tree(tree_id).await
    }

    /// Delete an entry on-chain, retrying on stale root
    pub async fn delete_entry(&self, entry_id: &str, authority: &str) -> Result<String> {
        self.submission.delete_entry(entry_id, authority).await
    }

    /// Grant an award to an entry on-chain, retrying on stale root
    pub async fn give_award(
        &self,
        entry_id: &str,
        giver: &str,
        kind: &str,
        amount: u64,
    ) -> Result<String> {
        self.submission.give_award(entry_id, giver, kind, amount).await
    }

    /// Ingestion counters
    pub fn ingest_stats(&self) -> IngestStats {
        self.ingestor.stats()
    }

    /// Shared cache handle
    pub fn storage(&self) -> Arc<IndexerStorage> {
        self.storage.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_support::{
        add_entry_data, init_forum_data, leaf_event_data, StaticContentFetcher,
    };
    use crate::schema::derive_entry_id;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    const PROGRAM: &str = "Forum1111111111111111111111111111111111111";

    /// Submitter double recording every accepted instruction
    struct RecordingSubmitter {
        submitted: Mutex<Vec<LedgerInstruction>>,
    }

    #[async_trait]
    impl Submitter for RecordingSubmitter {
        async fn submit(&self, instruction: &LedgerInstruction) -> Result<String> {
            self.submitted.lock().push(instruction.clone());
            Ok("sig".to_string())
        }
    }

    fn add_entry_tx(tree: &str, nonce: u64, tag: u8, reply_to: &str) -> DecodedTransaction {
        let entry_id = derive_entry_id(tree, nonce);
        DecodedTransaction {
            signature: format!("add-{}", nonce),
            block_time: 1_700_000_000,
            instructions: vec![DecodedInstruction {
                program_id: PROGRAM.to_string(),
                accounts: vec!["author".to_string(), tree.to_string()],
                data: add_entry_data(tag, "title", "", reply_to),
                inner_instructions: vec![InnerInstruction {
                    data: leaf_event_data(
                        &entry_id,
                        "author",
                        1_700_000_000,
                        nonce,
                        [nonce as u8 + 1; 32],
                    ),
                }],
            }],
        }
    }

    #[tokio::test]
    async fn indexes_proves_and_deletes_end_to_end() {
        let dir = TempDir::new().unwrap();
        let config = IndexerConfig {
            db_path: dir.path().to_str().unwrap().to_string(),
            program_id: PROGRAM.to_string(),
            ..IndexerConfig::default()
        };

        let rpc = Arc::new(MockLedgerRpc::new());
        rpc.set_tree_account(
            "tree",
            TreeAccount {
                max_depth: 3,
                canopy_depth: 0,
                current_root: [0x42; 32],
            },
        );
        let submitter = Arc::new(RecordingSubmitter {
            submitted: Mutex::new(Vec::new()),
        });

        let indexer = GroveIndexer::new(
            &config,
            rpc,
            Arc::new(StaticContentFetcher::empty()),
            submitter.clone(),
        )
        .await
        .unwrap();

        // Forum init, a post, and a comment replying to it
        let init = DecodedTransaction {
            signature: "init".to_string(),
            block_time: 1_700_000_000,
            instructions: vec![DecodedInstruction {
                program_id: PROGRAM.to_string(),
                accounts: vec!["owner".to_string(), "tree".to_string()],
                data: init_forum_data(3, 8, 0),
                inner_instructions: vec![],
            }],
        };
        let post_id = derive_entry_id("tree", 0);
        indexer
            .process_batch(&[
                init,
                add_entry_tx("tree", 0, 0, ""),
                add_entry_tx("tree", 1, 3, &post_id),
            ])
            .await
            .unwrap();

        assert_eq!(indexer.get_tree("tree").await.unwrap().max_depth, 3);
        assert_eq!(indexer.tree_entries("tree", 10).await.unwrap().len(), 2);
        assert_eq!(indexer.replies_to("tree", &post_id, 10).await.unwrap().len(), 1);

        let (entry, proof) = indexer.entry_with_proof(&post_id).await.unwrap();
        assert_eq!(entry.nonce, 0);
        assert_eq!(proof.proof.len(), 3);
        assert_eq!(proof.data_hash, [1; 32]);

        // Delete on-chain, then feed the submitted transaction back in as
        // the webhook would deliver it
        indexer.delete_entry(&post_id, "authority").await.unwrap();
        let submitted = submitter.submitted.lock()[0].clone();
        indexer
            .process_transaction(&DecodedTransaction {
                signature: "delete".to_string(),
                block_time: 1_700_000_001,
                instructions: vec![DecodedInstruction {
                    program_id: submitted.program_id,
                    accounts: submitted.accounts,
                    data: bs58::encode(&submitted.data).into_string(),
                    inner_instructions: vec![],
                }],
            })
            .await
            .unwrap();

        let (row, proof) = indexer.entry_with_proof(&post_id).await.unwrap();
        assert!(row.is_tombstone());
        assert_eq!(proof.data_hash, [0; 32]);

        let stats = indexer.ingest_stats();
        assert_eq!(stats.transactions, 4);
        assert_eq!(stats.applied, 4);
        assert_eq!(stats.failed, 0);
    }
}
