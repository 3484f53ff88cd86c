//! Error types for the store module.

use thiserror::Error;

use txrecon_core::CoreError;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A writer panicked while holding the store lock.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Clock or configuration error from the core.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Invalid data handed to the store.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
