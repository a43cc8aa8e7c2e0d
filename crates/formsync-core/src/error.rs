//! Error types for formsync-core

use thiserror::Error;

/// Result type alias using formsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in formsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote system unreachable or timed out
    #[error("Network error: {0}")]
    Network(String),

    /// Remote system refused the request
    #[error("Rejected by remote ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl Error {
    /// Whether this error means local persistence itself is broken.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Database(_) | Self::LibSql(_) | Self::Io(_))
    }

    /// Whether retrying the same operation later may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
