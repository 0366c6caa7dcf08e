//! Error types for Hippocampus

use thiserror::Error;

/// Result type alias using Hippocampus's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Hippocampus
#[derive(Error, Debug)]
pub enum Error {
    /// Embedding model load or inference error
    #[error("Model error: {0}")]
    Model(String),

    /// Snapshot save/load error
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Model(_) | Error::Persistence(_) | Error::Io(_) | Error::Timeout(_)
        )
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}
