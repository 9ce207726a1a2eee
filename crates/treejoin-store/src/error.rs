//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during model and persistence operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Local state diverges from the applied update. The update was still
    /// applied; during a bootstrap the incoming state always wins.
    #[error("conflict at {path}")]
    Conflict { path: String },

    /// Object or staged content not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Background task failed.
    #[error("task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this is the expected-during-bootstrap conflict kind.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<treejoin_core::CoreError> for StoreError {
    fn from(e: treejoin_core::CoreError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
