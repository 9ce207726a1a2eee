//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during a bootstrap exchange.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Address is not known to the transport.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// The channel was closed.
    #[error("channel closed")]
    Closed,

    /// Message or file name could not be decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] treejoin_core::CoreError),

    /// Model or persistence operation failed.
    #[error("store error: {0}")]
    StoreError(#[from] treejoin_store::StoreError),

    /// A file arrived that no push announced.
    #[error("untracked push: {0}")]
    UntrackedPush(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
