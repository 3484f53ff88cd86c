//! Reconciliation configuration.
//!
//! One flat record holding every tunable the sketches and the round
//! protocol recognize. All fields have defaults, so a partial JSON/TOML
//! document deserializes into a complete configuration.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Upper bound on `n_cells`. Bank digests carry one partition per cell and
/// the wire limits reject more than this.
pub const MAX_CELLS: usize = 4096;

/// Which sketch variant a single-sketch reconciliation set uses.
///
/// Chosen once per session from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SketchKind {
    /// Lossy membership filter.
    #[default]
    Bloom,
    /// Algebraic sketch with exact decode up to capacity.
    Invertible,
    /// Invertible bloom lookup table.
    Iblt,
}

/// Configuration for sketches and the reconciliation protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Number of peer-clock cells (and partitions of the sketch bank).
    pub n_cells: usize,
    /// Default per-partition sketch capacity.
    pub sketch_size: usize,
    /// Bloom filter size in bits.
    pub bloom_size: usize,
    /// Number of Bloom hash functions.
    pub bloom_num_func: usize,
    /// Bloom seeds are rotated modulo this value.
    pub bloom_max_seed: u64,
    /// Maximum number of partitions escalated to an explicit id list.
    pub max_sections: usize,
    /// Peers selected per reconciliation tick (scheduling hint).
    pub recon_fanout: usize,
    /// Interval between reconciliation ticks in milliseconds (scheduling hint).
    pub recon_freq_ms: u64,
    /// Round budget of a partitioned session.
    pub max_rounds: u64,
    /// Capacity multiplier applied to suspect partitions.
    pub growth_factor: usize,
    /// Sketch variant for single-sketch reconciliation.
    pub sketch_kind: SketchKind,
    /// Number of IBLT hash functions.
    pub iblt_hashes: usize,
    /// Seed of the peer-clock cell partitioner. Must agree network-wide for
    /// clocks to be comparable.
    pub clock_seed: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            n_cells: 32,
            sketch_size: 8,
            bloom_size: 8 * 100,
            bloom_num_func: 2,
            bloom_max_seed: 255,
            max_sections: 16,
            recon_fanout: 7,
            recon_freq_ms: 5_000,
            max_rounds: 3,
            growth_factor: 4,
            sketch_kind: SketchKind::Bloom,
            iblt_hashes: 3,
            clock_seed: 0,
        }
    }
}

impl ReconciliationConfig {
    /// Check every value is in range.
    pub fn validate(&self) -> Result<()> {
        if self.n_cells == 0 || self.n_cells > MAX_CELLS {
            return Err(CoreError::InvalidConfig(format!(
                "n_cells must be in 1..={}, got {}",
                MAX_CELLS, self.n_cells
            )));
        }
        if self.bloom_size == 0 {
            return Err(CoreError::InvalidConfig("bloom_size must be positive".into()));
        }
        if self.bloom_num_func == 0 {
            return Err(CoreError::InvalidConfig(
                "bloom_num_func must be positive".into(),
            ));
        }
        if self.bloom_max_seed == 0 {
            return Err(CoreError::InvalidConfig(
                "bloom_max_seed must be positive".into(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(CoreError::InvalidConfig("max_rounds must be positive".into()));
        }
        if self.growth_factor < 2 {
            return Err(CoreError::InvalidConfig(format!(
                "growth_factor must be at least 2, got {}",
                self.growth_factor
            )));
        }
        if self.iblt_hashes == 0 {
            return Err(CoreError::InvalidConfig("iblt_hashes must be positive".into()));
        }
        Ok(())
    }

    /// Reconciliation interval as a `Duration`.
    pub fn recon_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.recon_freq_ms)
    }
}
