//! Error types for the Node.

use thiserror::Error;
use txrecon_core::CoreError;
use txrecon_store::StoreError;
use txrecon_sync::SyncError;

/// Errors that can occur during Node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration or clock error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Reconciliation error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Invalid operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for Node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
