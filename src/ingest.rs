//! Webhook transaction ingestion
//!
//! Applies decoded transactions to the cache in exactly the order the
//! upstream webhook delivers them. Each instruction is parsed in
//! isolation: a malformed instruction is logged and skipped without
//! aborting its siblings, and replaying a whole transaction is safe
//! because every cache mutation is keyed by a deterministic id.

use crate::error::Result;
use crate::parser::{DecodedTransaction, ParseOutcome, TransactionParser};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Running ingestion counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub transactions: u64,
    pub applied: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Outcome of processing one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub signature: String,
    pub outcomes: Vec<ParseOutcome>,
    pub failed: u64,
}

/// Transaction ingestor feeding the parser
pub struct TransactionIngestor {
    parser: TransactionParser,
    stats: RwLock<IngestStats>,
}

impl TransactionIngestor {
    pub fn new(parser: TransactionParser) -> Self {
        Self {
            parser,
            stats: RwLock::new(IngestStats::default()),
        }
    }

    /// Process one decoded transaction, instruction by instruction
    pub async fn process_transaction(&self, tx: &DecodedTransaction) -> Result<IngestReport> {
        debug!(
            "Processing transaction {} ({} instructions)",
            tx.signature,
            tx.instructions.len()
        );

        let mut outcomes = Vec::with_capacity(tx.instructions.len());
        let mut failed = 0u64;

        for (index, instruction) in tx.instructions.iter().enumerate() {
            match self.parser.parse_instruction(instruction, tx.block_time).await {
                Ok(outcome) => outcomes.push(outcome),
                // Isolate the blast radius to this instruction
                Err(e) => {
                    warn!(
                        "Instruction {} of transaction {} failed: {}",
                        index, tx.signature, e
                    );
                    failed += 1;
                }
            }
        }

        let mut stats = self.stats.write();
        stats.transactions += 1;
        stats.failed += failed;
        for outcome in &outcomes {
            match outcome {
                ParseOutcome::Skipped => stats.skipped += 1,
                _ => stats.applied += 1,
            }
        }

        Ok(IngestReport {
            signature: tx.signature.clone(),
            outcomes,
            failed,
        })
    }

    /// Process a batch of transactions in delivery order
    pub async fn process_batch(&self, txs: &[DecodedTransaction]) -> Result<Vec<IngestReport>> {
        let mut reports = Vec::with_capacity(txs.len());
        for tx in txs {
            reports.push(self.process_transaction(tx).await?);
        }
        Ok(reports)
    }

    /// Current ingestion counters
    pub fn stats(&self) -> IngestStats {
        *self.stats.read()
    }
}
