//! Grove indexer error types

use thiserror::Error;

/// Grove indexer result type
pub type Result<T> = std::result::Result<T, IndexerError>;

/// Grove indexer errors
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Tree not found: {0}")]
    TreeNotFound(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Ledger RPC error: {0}")]
    Rpc(String),

    #[error("Root mismatch: proof no longer matches the on-chain root")]
    RootMismatch,

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Invalid tree config: {0}")]
    InvalidTreeConfig(String),

    #[error("Content fetch error: {0}")]
    ContentFetch(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<parity_db::Error> for IndexerError {
    fn from(err: parity_db::Error) -> Self {
        IndexerError::Database(err.to_string())
    }
}
