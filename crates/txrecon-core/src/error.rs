//! Error types for txrecon core.

use thiserror::Error;

/// Core errors raised by clocks and configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A clock delta does not fit the fixed-width compact encoding.
    ///
    /// The clock needs rotating; this is not recovered here.
    #[error("clock compaction overflow at cell {cell}: delta {delta} exceeds {max}")]
    ClockCompactionOverflow { cell: usize, delta: u64, max: u64 },

    /// Two clocks with different cell counts were compared.
    #[error("clock shape mismatch: {local} cells vs {remote} cells")]
    ClockShapeMismatch { local: usize, remote: usize },

    /// Two clocks partitioned under different seeds were compared; their
    /// cell indices mean different things.
    #[error("clock seed mismatch: {local} vs {remote}")]
    ClockSeedMismatch { local: u64, remote: u64 },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
