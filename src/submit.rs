//! Ledger submission helpers
//!
//! Builds the state-changing instructions that consume a built proof and
//! drives the retry policy around them. A submitted root can go stale at
//! any moment between the proof build and the ledger's verification; that
//! window is not detectable locally, so the policy here is rebuild-and-
//! resubmit on rejection, bounded by a small attempt count.
//!
//! Wire layout mirrors what the parser decodes: `delete_entry` carries its
//! leaf index in the trailing 4 bytes, `give_award` leads with its typed
//! arguments. A transaction submitted here re-enters the parser once the
//! webhook delivers it back.

use crate::error::{IndexerError, Result};
use crate::ledger::LedgerRpc;
use crate::proof::{decode_sibling_hashes, ProofBuilder};
use crate::storage::IndexerStorage;
use crate::types::LeafProof;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// A built instruction ready for signing and submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerInstruction {
    pub program_id: String,
    /// Positional accounts: `[authority, tree, ..]`
    pub accounts: Vec<String>,
    pub data: Vec<u8>,
}

/// Signs and submits instructions to the ledger
///
/// Wallet mechanics live behind this seam. A submission the ledger
/// rejects because the supplied root no longer matches must surface as
/// [`IndexerError::RootMismatch`] so the helper can rebuild and retry.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Submit an instruction; returns the transaction signature
    async fn submit(&self, instruction: &LedgerInstruction) -> Result<String>;
}

/// Derive an instruction discriminator from its name
fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{}", name).as_bytes());
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&digest[..8]);
    disc
}

/// Build a `delete_entry` instruction from a proof
///
/// Data: discriminator, root, data hash, sibling hashes leaf to root,
/// then the leaf index in the trailing 4 bytes.
pub fn build_delete_instruction(
    program_id: &str,
    authority: &str,
    tree_id: &str,
    proof: &LeafProof,
) -> Result<LedgerInstruction> {
    let mut data = instruction_discriminator("delete_entry").to_vec();
    data.extend_from_slice(&proof.root);
    data.extend_from_slice(&proof.data_hash);
    for sibling in decode_sibling_hashes(proof)? {
        data.extend_from_slice(&sibling);
    }
    data.extend_from_slice(&(proof.nonce as u32).to_le_bytes());

    Ok(LedgerInstruction {
        program_id: program_id.to_string(),
        accounts: vec![authority.to_string(), tree_id.to_string()],
        data,
    })
}

/// Build a `give_award` instruction from a proof
///
/// Data: discriminator, award kind, amount, leaf index, then root, data
/// hash, and sibling hashes leaf to root.
pub fn build_award_instruction(
    program_id: &str,
    giver: &str,
    tree_id: &str,
    kind: &str,
    amount: u64,
    proof: &LeafProof,
) -> Result<LedgerInstruction> {
    let mut data = instruction_discriminator("give_award").to_vec();
    data.extend_from_slice(&(kind.len() as u32).to_le_bytes());
    data.extend_from_slice(kind.as_bytes());
    data.extend_from_slice(&amount.to_le_bytes());
    data.extend_from_slice(&(proof.nonce as u32).to_le_bytes());
    data.extend_from_slice(&proof.root);
    data.extend_from_slice(&proof.data_hash);
    for sibling in decode_sibling_hashes(proof)? {
        data.extend_from_slice(&sibling);
    }

    Ok(LedgerInstruction {
        program_id: program_id.to_string(),
        accounts: vec![giver.to_string(), tree_id.to_string()],
        data,
    })
}

/// Drives proof-backed submissions with bounded stale-root retries
pub struct SubmissionHelper {
    storage: Arc<IndexerStorage>,
    builder: ProofBuilder,
    submitter: Arc<dyn Submitter>,
    program_id: String,
    max_attempts: u32,
}

impl SubmissionHelper {
    pub fn new(
        storage: Arc<IndexerStorage>,
        rpc: Arc<dyn LedgerRpc>,
        submitter: Arc<dyn Submitter>,
        program_id: &str,
        max_attempts: u32,
    ) -> Self {
        Self {
            builder: ProofBuilder::new(storage.clone(), rpc),
            storage,
            submitter,
            program_id: program_id.to_string(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delete an entry on-chain, rebuilding the proof on root mismatch
    pub async fn delete_entry(&self, entry_id: &str, authority: &str) -> Result<String> {
        self.submit_with_retry(entry_id, |tree_id, proof| {
            build_delete_instruction(&self.program_id, authority, tree_id, proof)
        })
        .await
    }

    /// Grant an award to an entry on-chain
    pub async fn give_award(
        &self,
        entry_id: &str,
        giver: &str,
        kind: &str,
        amount: u64,
    ) -> Result<String> {
        self.submit_with_retry(entry_id, |tree_id, proof| {
            build_award_instruction(&self.program_id, giver, tree_id, kind, amount, proof)
        })
        .await
    }

    async fn submit_with_retry(
        &self,
        entry_id: &str,
        build: impl Fn(&str, &LeafProof) -> Result<LedgerInstruction>,
    ) -> Result<String> {
        let entry = self.storage.get_entry(entry_id).await?;

        for attempt in 1..=self.max_attempts {
            // Fresh proof every attempt: the rejection means the root
            // moved, so the previous path is worthless
            let proof = self.builder.build_proof(entry_id).await?;
            let instruction = build(&entry.tree_id, &proof)?;

            match self.submitter.submit(&instruction).await {
                Ok(signature) => {
                    debug!(
                        "Submitted instruction for entry {} on attempt {}",
                        entry_id, attempt
                    );
                    return Ok(signature);
                }
                Err(IndexerError::RootMismatch) => {
                    warn!(
                        "Root moved under entry {} (attempt {}), rebuilding proof",
                        entry_id, attempt
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(IndexerError::Submission(format!(
            "root kept moving for entry {} across {} attempts",
            entry_id, self.max_attempts
        )))
    }
}
