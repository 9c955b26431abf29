//! Ledger RPC collaborator
//!
//! Fetches live tree account state (depth, canopy, current root) from the
//! ledger. The root changes on every write to a tree, so this call sits on
//! the critical path of every proof build and is never served from a
//! cache. Transport failures are retried a bounded number of times with an
//! explicit request timeout.

use crate::error::{IndexerError, Result};
use crate::types::{Hash32, TreeAccount};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Live ledger reads needed by the proof builder
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Fetch the latest confirmed state of a tree account
    async fn fetch_tree_account(&self, tree_id: &str) -> Result<TreeAccount>;
}

/// JSON-RPC ledger client
pub struct HttpLedgerRpc {
    client: reqwest::Client,
    url: String,
    retries: u32,
}

/// Wire shape of a `getTreeAccount` response
#[derive(Debug, Deserialize)]
struct TreeAccountResponse {
    result: Option<TreeAccountResult>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TreeAccountResult {
    max_depth: u32,
    canopy_depth: u32,
    /// Current root, base58
    root: String,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl HttpLedgerRpc {
    /// Create a new client against the given endpoint
    pub fn new(url: &str, timeout_ms: u64, retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| IndexerError::Rpc(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            retries,
        })
    }

    async fn request_tree_account(&self, tree_id: &str) -> Result<TreeAccount> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getTreeAccount",
            "params": [tree_id],
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexerError::Rpc(e.to_string()))?;

        let parsed: TreeAccountResponse = response
            .json()
            .await
            .map_err(|e| IndexerError::Rpc(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(IndexerError::Rpc(format!(
                "ledger error {}: {}",
                err.code, err.message
            )));
        }

        let result = parsed
            .result
            .ok_or_else(|| IndexerError::TreeNotFound(tree_id.to_string()))?;

        let root = decode_root(&result.root)?;
        Ok(TreeAccount {
            max_depth: result.max_depth,
            canopy_depth: result.canopy_depth,
            current_root: root,
        })
    }
}

#[async_trait]
impl LedgerRpc for HttpLedgerRpc {
    async fn fetch_tree_account(&self, tree_id: &str) -> Result<TreeAccount> {
        let mut last_err = None;

        for attempt in 0..=self.retries {
            match self.request_tree_account(tree_id).await {
                Ok(account) => {
                    debug!(
                        "Fetched tree account {} (depth {}, canopy {})",
                        tree_id, account.max_depth, account.canopy_depth
                    );
                    return Ok(account);
                }
                // Missing account is definitive, no point retrying
                Err(IndexerError::TreeNotFound(id)) => {
                    return Err(IndexerError::TreeNotFound(id));
                }
                Err(e) => {
                    warn!(
                        "Tree account fetch attempt {} for {} failed: {}",
                        attempt + 1,
                        tree_id,
                        e
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| IndexerError::Rpc("no attempts made".to_string())))
    }
}

/// Decode a base58 32-byte root
fn decode_root(encoded: &str) -> Result<Hash32> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| IndexerError::Rpc(format!("invalid root encoding: {}", e)))?;
    if bytes.len() != 32 {
        return Err(IndexerError::Rpc(format!(
            "invalid root length: {}",
            bytes.len()
        )));
    }
    let mut root = [0u8; 32];
    root.copy_from_slice(&bytes);
    Ok(root)
}

/// In-memory ledger double for tests
pub struct MockLedgerRpc {
    accounts: parking_lot::RwLock<HashMap<String, TreeAccount>>,
}

impl MockLedgerRpc {
    pub fn new() -> Self {
        Self {
            accounts: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// Set the live state returned for a tree
    pub fn set_tree_account(&self, tree_id: &str, account: TreeAccount) {
        self.accounts
            .write()
            .insert(tree_id.to_string(), account);
    }
}

impl Default for MockLedgerRpc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerRpc for MockLedgerRpc {
    async fn fetch_tree_account(&self, tree_id: &str) -> Result<TreeAccount> {
        self.accounts
            .read()
            .get(tree_id)
            .cloned()
            .ok_or_else(|| IndexerError::TreeNotFound(tree_id.to_string()))
    }
}
