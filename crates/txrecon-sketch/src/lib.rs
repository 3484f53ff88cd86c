//! # txrecon sketches
//!
//! Compact set summaries used to reconcile transaction pools between peers.
//!
//! ## Variants
//!
//! - [`BloomFilter`] - lossy membership; finds cells the peer lacks
//! - [`InvertibleSketch`] - XOR-mergeable, exact decode up to its capacity
//! - [`Iblt`] - subtractable hash table with peeling decode and payloads
//! - [`CmsBank`] / [`PbsBank`] - hash-partitioned banks with per-partition
//!   checksums, so only failed partitions are retried
//!
//! [`Sketch`] wraps the three single-sketch variants behind one tagged type.
//!
//! Every sketch is a pure value: no I/O, no shared state. Seeds are explicit
//! and travel with serialized data.

pub mod bank;
pub mod bloom;
pub mod error;
mod field;
pub mod iblt;
pub mod invertible;
pub mod sketch;

pub use bank::{
    BankDigest, CmsBank, PartitionFailure, PartitionOutcome, PbsBank, PbsOutcome,
    PBS_MAX_PARTITIONS,
};
pub use bloom::BloomFilter;
pub use error::{Result, SketchError};
pub use iblt::{Iblt, IbltDecode, Lookup};
pub use invertible::{item_salt, InvertibleSketch};
pub use sketch::{CompactSketch, Sketch, SketchDiff};
