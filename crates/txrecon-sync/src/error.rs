//! Error types for the sync module.

use thiserror::Error;

use txrecon_core::PeerId;

use crate::messages::ErrorCode;

/// Errors that can occur during reconciliation sessions.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Clock or configuration error.
    #[error("core error: {0}")]
    Core(#[from] txrecon_core::CoreError),

    /// Sketch construction or comparison failed.
    #[error("sketch error: {0}")]
    Sketch(#[from] txrecon_sketch::SketchError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] txrecon_store::StoreError),

    /// A peer's clock went backwards in some cells and forwards in others.
    #[error("inconsistent clock from peer {0}")]
    InconsistentClock(PeerId),

    /// A message belongs to a different round of the session.
    #[error("round mismatch: expected {expected}, got {actual}")]
    RoundMismatch { expected: u64, actual: u64 },

    /// A session operation was called in the wrong state.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// This node is already waiting on a reply from the peer.
    #[error("a session with peer {0} is already in flight")]
    SessionInFlight(PeerId),

    /// Peer sent an error message.
    #[error("peer error ({code:?}): {message}")]
    PeerError { code: ErrorCode, message: String },

    /// CBOR encoding or decoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
