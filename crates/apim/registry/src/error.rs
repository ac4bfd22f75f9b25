//! Registry error types

use thiserror::Error;

/// Errors raised by a key-value store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store request timed out: {0}")]
    Timeout(String),

    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Store rejected request: {0}")]
    Rejected(String),

    #[error("Malformed store response: {0}")]
    Protocol(String),
}

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to encode resource {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode document at {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
