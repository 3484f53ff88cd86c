//! # txrecon
//!
//! Transaction-pool reconciliation for gossiping ledger peers.
//!
//! ## Overview
//!
//! Each peer holds a growing set of pending transaction ids and
//! periodically reconciles with random neighbours to learn what it is
//! missing, without shipping whole sets:
//!
//! - **Sketches**: Bloom filters, algebraic invertible sketches and IBLTs
//! - **Banks**: Hash-partitioned sketches that retry only failed partitions
//! - **Sessions**: A bounded round protocol that grows failing partitions
//!   and falls back to explicit ids when the budget runs out
//! - **Clocks**: Per-cell counters that tell whether a peer is worth a session
//!
//! ## Usage
//!
//! ```rust,no_run
//! use txrecon::{Node, NodeConfig};
//! use txrecon::store::MemoryStore;
//! use txrecon::sync::MemoryNetwork;
//! use txrecon::core::PeerId;
//!
//! async fn example() -> txrecon::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let me = network.create_transport(PeerId::random()).await;
//!
//!     let config = NodeConfig::default();
//!     let store = MemoryStore::from_config(&config.reconciliation);
//!     let node = Node::new(store, me, config)?;
//!
//!     node.add_transaction(&b"transfer 10 from a to b"[..]).await?;
//!     for (peer, report) in node.tick().await? {
//!         println!("{}: learned {} items", peer, report.inserted);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `txrecon::core` - Ids, hashing, peer clocks, configuration
//! - `txrecon::sketch` - Sketches and partitioned banks
//! - `txrecon::store` - Item store abstraction and in-memory store
//! - `txrecon::sync` - Sessions, wire messages, transport

pub mod error;
pub mod node;

// Re-export component crates
pub use txrecon_core as core;
pub use txrecon_sketch as sketch;
pub use txrecon_store as store;
pub use txrecon_sync as sync;

// Re-export main types for convenience
pub use error::{NodeError, Result};
pub use node::{Node, NodeConfig, SyncMode};

// Re-export commonly used types
pub use txrecon_core::{ItemId, PeerClock, PeerId, ReconciliationConfig, SketchKind};
pub use txrecon_sync::{ReconciliationSession, SyncReport};
