//! Error types for the document engine.

use mdcs_merkle::BlockError;
use mdcs_meta::MetaError;
use thiserror::Error;

/// Errors that can occur in engine operations.
#[derive(Error, Debug, Clone)]
pub enum CrdtError {
    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    #[error("Meta store error: {0}")]
    Meta(#[from] MetaError),

    #[error("Invalid document id: {0:?}")]
    InvalidDocumentId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine is closed: {0}")]
    Closed(String),
}

pub type Result<T> = std::result::Result<T, CrdtError>;
