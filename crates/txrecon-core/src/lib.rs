//! # txrecon core
//!
//! Pure primitives for transaction-pool reconciliation: item identifiers,
//! seeded hashing, peer clocks and configuration.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`ItemId`] - 64-bit transaction identifier being reconciled
//! - [`PeerId`] / [`PeerPair`] - Peer identities and canonical pairs
//! - [`HashPartitioner`] - Seeded item → cell map
//! - [`PeerClock`] - Per-cell item counters with compact encoding
//! - [`ReconciliationConfig`] - Recognized configuration options

pub mod clock;
pub mod config;
pub mod error;
pub mod hashing;
pub mod types;

pub use clock::{inconsistent, progressive, CompactClock, PeerClock, MAX_DELTA};
pub use config::{ReconciliationConfig, SketchKind, MAX_CELLS};
pub use error::{CoreError, Result};
pub use hashing::{fingerprint, item_hash, seeded_hash, HashPartitioner};
pub use types::{ItemId, PeerId, PeerPair};
