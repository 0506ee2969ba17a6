//! Error types for picklist-core

use thiserror::Error;

/// Result type alias using picklist-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in picklist-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected locally, never reaches the remote store
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entry or order vanished remotely
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or store failure during a remote write
    #[error("Remote write failed: {0}")]
    RemoteWrite(String),

    /// Programming-contract failure, fatal to the current operation
    #[error("State invariant violated: {0}")]
    Invariant(String),

    /// Submission cancelled by the operator before the completion write
    #[error("Submission cancelled")]
    Cancelled,

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Self::RemoteWrite(error.to_string())
    }
}
