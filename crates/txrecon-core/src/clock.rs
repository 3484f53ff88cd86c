//! Peer clock: per-cell counters of locally added items.
//!
//! A peer clock is a vector of monotonic counters, one per hash cell. Two
//! clocks can be compared cell-wise to decide whether one peer has strictly
//! more than the other (a one-way pull suffices) or whether the peers have
//! diverged in both directions (full reconciliation is needed).
//!
//! ## Compact encoding
//!
//! Clocks travel as `(offset, seed, deltas)` where `offset` is the minimum
//! count and each delta is stored as a `u16`. Deltas are bounded per epoch:
//! once a cell runs more than `u16::MAX` ahead of the slowest cell the clock
//! can no longer be compacted and must be rotated by the caller.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hashing::HashPartitioner;
use crate::types::ItemId;

/// Largest delta the compact encoding can carry.
pub const MAX_DELTA: u64 = u16::MAX as u64;

/// Delta at which [`PeerClock::needs_rotation`] starts reporting true.
pub const ROTATION_THRESHOLD: u64 = MAX_DELTA / 4 * 3;

/// Wire form of a [`PeerClock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactClock {
    /// Minimum count across all cells.
    pub offset: u64,
    /// Seed of the clock's cell partitioner.
    pub seed: u64,
    /// Per-cell count minus `offset`.
    pub deltas: Vec<u16>,
}

impl CompactClock {
    /// Number of cells described.
    pub fn cells(&self) -> usize {
        self.deltas.len()
    }
}

/// Per-cell item counters for one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerClock {
    counts: Vec<u64>,
    seed: u64,
}

impl PeerClock {
    /// Create an all-zero clock with `n_cells` cells.
    pub fn new(n_cells: usize, seed: u64) -> Self {
        Self {
            counts: vec![0; n_cells],
            seed,
        }
    }

    /// Build a clock from absolute counts.
    pub fn from_counts(counts: Vec<u64>, seed: u64) -> Self {
        Self { counts, seed }
    }

    /// Number of cells.
    pub fn n_cells(&self) -> usize {
        self.counts.len()
    }

    /// Partitioner seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Absolute per-cell counts.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// The cell an item is counted in.
    pub fn cell_of(&self, item: ItemId) -> usize {
        HashPartitioner::new(self.counts.len(), self.seed).cell(item)
    }

    /// Count for one cell (0 when out of range).
    pub fn count(&self, cell: usize) -> u64 {
        self.counts.get(cell).copied().unwrap_or(0)
    }

    /// Total number of items counted.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Record an item. Returns the cell that was bumped so the caller can
    /// route the item into the matching sketch bucket.
    pub fn increment(&mut self, item: ItemId) -> usize {
        let cell = self.cell_of(item);
        if let Some(count) = self.counts.get_mut(cell) {
            *count += 1;
        }
        cell
    }

    /// Largest distance between any cell and the slowest cell.
    pub fn max_delta(&self) -> u64 {
        let min = self.counts.iter().copied().min().unwrap_or(0);
        let max = self.counts.iter().copied().max().unwrap_or(0);
        max - min
    }

    /// True once the clock is close to overflowing its compact encoding.
    pub fn needs_rotation(&self) -> bool {
        self.max_delta() >= ROTATION_THRESHOLD
    }

    /// Encode as `(offset, seed, deltas)`.
    pub fn compact(&self) -> Result<CompactClock> {
        let offset = self.counts.iter().copied().min().unwrap_or(0);
        let deltas = self
            .counts
            .iter()
            .enumerate()
            .map(|(cell, &count)| {
                let delta = count - offset;
                u16::try_from(delta).map_err(|_| CoreError::ClockCompactionOverflow {
                    cell,
                    delta,
                    max: MAX_DELTA,
                })
            })
            .collect::<Result<Vec<u16>>>()?;

        Ok(CompactClock {
            offset,
            seed: self.seed,
            deltas,
        })
    }

    /// Reconstruct absolute counts from the compact form.
    pub fn from_compact(compact: &CompactClock) -> Self {
        let counts = compact
            .deltas
            .iter()
            .map(|&d| compact.offset.saturating_add(u64::from(d)))
            .collect();
        Self {
            counts,
            seed: compact.seed,
        }
    }

    /// Per-cell signed difference `self - other`.
    pub fn diff(&self, other: &PeerClock) -> Result<Vec<i64>> {
        self.check_shape(other)?;
        Ok(self
            .counts
            .iter()
            .zip(&other.counts)
            .map(|(&a, &b)| a as i64 - b as i64)
            .collect())
    }

    /// Cells whose counts differ between the two clocks.
    pub fn divergent_cells(&self, other: &PeerClock) -> Result<Vec<usize>> {
        Ok(self
            .diff(other)?
            .into_iter()
            .enumerate()
            .filter(|(_, d)| *d != 0)
            .map(|(cell, _)| cell)
            .collect())
    }

    /// Adopt another peer's counts as a lower bound (cell-wise max).
    pub fn merge(&mut self, other: &PeerClock) -> Result<()> {
        self.check_shape(other)?;
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine = (*mine).max(*theirs);
        }
        Ok(())
    }

    fn check_shape(&self, other: &PeerClock) -> Result<()> {
        if self.counts.len() != other.counts.len() {
            return Err(CoreError::ClockShapeMismatch {
                local: self.counts.len(),
                remote: other.counts.len(),
            });
        }
        if self.seed != other.seed {
            return Err(CoreError::ClockSeedMismatch {
                local: self.seed,
                remote: other.seed,
            });
        }
        Ok(())
    }
}

/// True iff the clocks diverge in both directions: some cell is ahead in
/// `c1` and some other cell is ahead in `c2`.
///
/// Clocks of different shapes or seeds are always inconsistent.
pub fn inconsistent(c1: &PeerClock, c2: &PeerClock) -> bool {
    match c2.diff(c1) {
        Ok(diff) => diff.iter().any(|&d| d < 0) && diff.iter().any(|&d| d > 0),
        Err(_) => true,
    }
}

/// True iff `c2` dominates `c1` in every cell. With `strict`, `c2` must
/// also be ahead in at least one cell.
///
/// Clocks of different shapes or seeds are never progressive.
pub fn progressive(c1: &PeerClock, c2: &PeerClock, strict: bool) -> bool {
    match c2.diff(c1) {
        Ok(diff) => {
            let dominates = diff.iter().all(|&d| d >= 0);
            if strict {
                dominates && diff.iter().any(|&d| d > 0)
            } else {
                dominates
            }
        }
        Err(_) => false,
    }
}
