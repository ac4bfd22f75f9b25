//! Controller error types

use apim_registry::{RegistryError, StoreError};
use apim_types::{ReleaseHistoryId, ReleaseStatus};
use thiserror::Error;

/// Errors raised while preparing, distributing or recording a release
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Release lock not acquired: {0}")]
    LockTimeout(String),

    #[error("Distribution failed: {0}")]
    Distribution(String),

    #[error("Invalid status transition for {history_id}: {from} -> {to}")]
    InvalidTransition {
        history_id: ReleaseHistoryId,
        from: ReleaseStatus,
        to: ReleaseStatus,
    },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        ControllerError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for ControllerError {
    fn from(err: StoreError) -> Self {
        ControllerError::Registry(RegistryError::Store(err))
    }
}

/// Deploy tool and chart repository errors
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Deploy request timed out: {0}")]
    Timeout(String),

    #[error("Deploy API unreachable: {0}")]
    Connection(String),

    #[error("Deploy API rejected request: {0}")]
    Rejected(String),

    #[error("Failed to render values: {0}")]
    Values(#[from] serde_yaml::Error),
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;
