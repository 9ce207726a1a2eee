//! Error types for treejoin core.

use thiserror::Error;

/// Errors raised while decoding wire data or file names.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unrecognized message type: {0}")]
    UnknownMessageType(String),

    #[error("malformed staged file name: {0}")]
    MalformedStagedName(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
