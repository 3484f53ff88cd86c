//! The sketch variants behind one tagged type.
//!
//! A reconciliation set picks its variant once from [`SketchKind`] and then
//! only uses the shared capability set: add, serialize, compare with a peer.

use serde::{Deserialize, Serialize};
use txrecon_core::{fingerprint, ItemId, ReconciliationConfig, SketchKind};

use crate::bloom::BloomFilter;
use crate::error::{Result, SketchError};
use crate::iblt::Iblt;
use crate::invertible::{item_salt, InvertibleSketch};

/// Serialized sketch as carried on the wire. The seed always travels with
/// the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactSketch {
    pub kind: SketchKind,
    pub data: Vec<u8>,
    pub seed: u64,
    /// Variant-specific checksum: the Bloom XOR fold, or the additive
    /// fingerprint sum of the exact variants.
    pub checksum: u64,
}

/// What comparing with a peer sketch revealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SketchDiff {
    /// Bloom positions set locally but clear in the peer's filter.
    Positions(Vec<usize>),
    /// Decoded symmetric difference. Not `complete` when the decode was
    /// partial or disagrees with the checksums.
    Symmetric { items: Vec<ItemId>, complete: bool },
}

/// One sketch of any supported variant.
#[derive(Debug, Clone)]
pub enum Sketch {
    Bloom(BloomFilter),
    Invertible {
        sketch: InvertibleSketch,
        seed: u64,
        checksum: u64,
    },
    Iblt { table: Iblt, checksum: u64 },
}

impl Sketch {
    /// Build an empty sketch of `kind` sized from the configuration.
    pub fn new(kind: SketchKind, config: &ReconciliationConfig, seed: u64) -> Result<Self> {
        Ok(match kind {
            SketchKind::Bloom => {
                Sketch::Bloom(BloomFilter::new(config.bloom_size, config.bloom_num_func, seed))
            }
            SketchKind::Invertible => Sketch::Invertible {
                sketch: InvertibleSketch::new(config.sketch_size),
                seed,
                checksum: 0,
            },
            SketchKind::Iblt => Sketch::Iblt {
                table: Iblt::new(2 * config.sketch_size + 8, config.iblt_hashes, 0, seed)?,
                checksum: 0,
            },
        })
    }

    pub fn kind(&self) -> SketchKind {
        match self {
            Sketch::Bloom(_) => SketchKind::Bloom,
            Sketch::Invertible { .. } => SketchKind::Invertible,
            Sketch::Iblt { .. } => SketchKind::Iblt,
        }
    }

    pub fn seed(&self) -> u64 {
        match self {
            Sketch::Bloom(bf) => bf.seed(),
            Sketch::Invertible { seed, .. } => *seed,
            Sketch::Iblt { table, .. } => table.seed(),
        }
    }

    /// Add an item. Returns the Bloom positions it set; exact variants
    /// return nothing.
    pub fn add(&mut self, item: ItemId) -> Vec<usize> {
        match self {
            Sketch::Bloom(bf) => bf.add(item),
            Sketch::Invertible {
                sketch,
                seed,
                checksum,
            } => {
                sketch.add(item.value() ^ item_salt(*seed));
                *checksum = checksum.wrapping_add(fingerprint(*seed, item));
                Vec::new()
            }
            Sketch::Iblt { table, checksum } => {
                // Value size is zero, so insertion cannot fail.
                let _ = table.insert(item, &[]);
                *checksum = checksum.wrapping_add(fingerprint(table.seed(), item));
                Vec::new()
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Sketch::Bloom(bf) => bf.serialize(),
            Sketch::Invertible { sketch, .. } => sketch.serialize(),
            Sketch::Iblt { table, .. } => table.serialize(),
        }
    }

    pub fn checksum(&self) -> u64 {
        match self {
            Sketch::Bloom(bf) => u64::from(bf.checksum()),
            Sketch::Invertible { checksum, .. } | Sketch::Iblt { checksum, .. } => *checksum,
        }
    }

    pub fn to_compact(&self) -> CompactSketch {
        match self {
            Sketch::Bloom(bf) => bf.to_compact(),
            _ => CompactSketch {
                kind: self.kind(),
                data: self.serialize(),
                seed: self.seed(),
                checksum: self.checksum(),
            },
        }
    }

    /// Merge (or subtract) the peer's sketch and decode (or test) the
    /// result.
    pub fn diff(&self, peer: &CompactSketch) -> Result<SketchDiff> {
        if peer.kind != self.kind() || peer.seed != self.seed() {
            return Err(SketchError::ParameterMismatch(format!(
                "local {:?} sketch with seed {}, peer {:?} with seed {}",
                self.kind(),
                self.seed(),
                peer.kind,
                peer.seed
            )));
        }

        match self {
            Sketch::Bloom(bf) => {
                let theirs = BloomFilter::from_compact(peer, bf.num_func())?;
                Ok(SketchDiff::Positions(bf.diff(&theirs)?))
            }
            Sketch::Invertible {
                sketch,
                seed,
                checksum,
            } => {
                let mut merged = sketch.clone();
                merged.merge(&peer.data)?;
                let salt = item_salt(*seed);
                let values = match merged.decode() {
                    Ok(values) => values,
                    // Over capacity: nothing recovered, never fatal.
                    Err(SketchError::DecodeCapacityExceeded { capacity }) => {
                        tracing::debug!(capacity, "invertible sketch difference exceeds capacity");
                        return Ok(SketchDiff::Symmetric {
                            items: Vec::new(),
                            complete: false,
                        });
                    }
                    Err(e) => return Err(e),
                };
                let items: Vec<ItemId> = values.into_iter().map(|v| ItemId(v ^ salt)).collect();
                let complete = !items.is_empty() || *checksum == peer.checksum;
                Ok(SketchDiff::Symmetric { items, complete })
            }
            Sketch::Iblt { table, checksum } => {
                let mut merged = table.clone();
                merged.subtract(&Iblt::deserialize(&peer.data)?)?;
                let decoded = merged.decode();
                let mut items: Vec<ItemId> = decoded
                    .inserted
                    .iter()
                    .chain(&decoded.removed)
                    .map(|(key, _)| *key)
                    .collect();
                items.sort();
                let complete =
                    decoded.complete && (!items.is_empty() || *checksum == peer.checksum);
                Ok(SketchDiff::Symmetric { items, complete })
            }
        }
    }
}
