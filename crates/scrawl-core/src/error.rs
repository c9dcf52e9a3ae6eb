//! Error types for scrawl-core

use thiserror::Error;

use crate::store::RemoteError;

/// Result type alias using scrawl-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in scrawl-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Note not found
    #[error("Note not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store error
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// Sync attempt exceeded its deadline
    #[error("Sync timed out after {0:?}")]
    Timeout(std::time::Duration),
}
