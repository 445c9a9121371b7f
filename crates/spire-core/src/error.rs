//! Error types for the Spire engine
//!
//! All fallible operations return `Result<T, Error>`.
//! Faults raised *inside* a DApp program are not errors of the engine; they
//! are [`crate::executor::Fault`] values carried by an execution outcome.

use thiserror::Error;

/// Spire engine error types
#[derive(Debug, Error)]
pub enum Error {
    /// Creation requested for an id already present in the registry
    #[error("DApp '{0}' already exists")]
    DuplicateId(String),

    /// Operation addressed to an id that is not in the registry
    #[error("DApp '{0}' does not exist")]
    UnknownDapp(String),

    /// Program text could not be tokenized or parsed
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// Inbound operation failed the schema gate
    #[error("Rejected operation: {key}: {reason}")]
    Rejected { key: String, reason: String },

    /// Block feed is malformed or out of order
    #[error("Feed error: {0}")]
    Feed(String),

    /// Configuration value could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Snapshot persistence failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn rejected(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Rejected {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Spire operations
pub type Result<T> = std::result::Result<T, Error>;
