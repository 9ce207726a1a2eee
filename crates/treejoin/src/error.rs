//! Error types for bootstrap sessions.

use std::path::PathBuf;

use thiserror::Error;
use treejoin_core::CoreError;
use treejoin_store::StoreError;
use treejoin_sync::SyncError;

/// Errors that can occur while creating, loading or driving a session.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The root already holds a bootstrapped tree.
    #[error("already initialized: {0}")]
    AlreadyInitialized(PathBuf),

    /// The root was never created.
    #[error("not initialized: {0}")]
    NotInitialized(PathBuf),

    /// The root exists but can not be reopened for a bootstrap.
    #[error("not bootstrap capable: {0}")]
    NotBootstrapCapable(String),

    /// Another `start` call is still running.
    #[error("a start is already in progress")]
    AlreadyStarting,

    /// The session was closed.
    #[error("session closed")]
    Closed,

    /// Transport error, passed through unchanged.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Persistence error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Encoding error.
    #[error("encoding error: {0}")]
    Core(#[from] CoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bootstrap operations.
pub type Result<T> = std::result::Result<T, BootstrapError>;
