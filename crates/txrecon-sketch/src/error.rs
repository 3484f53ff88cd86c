//! Error types for the sketch module.

use thiserror::Error;

/// Errors that can occur while building, merging or decoding sketches.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SketchError {
    /// The difference held by a sketch is larger than its capacity.
    ///
    /// The round's result for this sketch must be discarded and retried
    /// with a larger capacity; it is never ground truth.
    #[error("decode capacity exceeded (capacity {capacity})")]
    DecodeCapacityExceeded { capacity: usize },

    /// Serialized input has the wrong length.
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Two sketches with incompatible parameters were combined.
    #[error("parameter mismatch: {0}")]
    ParameterMismatch(String),

    /// A sketch was constructed with unusable parameters.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Result type for sketch operations.
pub type Result<T> = std::result::Result<T, SketchError>;
