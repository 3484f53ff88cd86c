//! # txrecon store
//!
//! The local item store that feeds reconciliation. Sketches and clocks are
//! never persisted; they are rebuilt per session from this store.
//!
//! ## Key Types
//!
//! - [`ItemStore`] - The async trait every store implements
//! - [`MemoryStore`] - In-memory store: many readers, one appending writer
//! - [`InsertResult`] - Result of inserting an item
//!
//! ## Usage
//!
//! ```rust,no_run
//! use txrecon_core::{ItemId, ReconciliationConfig};
//! use txrecon_store::{ItemStore, MemoryStore};
//!
//! async fn example() {
//!     let store = MemoryStore::from_config(&ReconciliationConfig::default());
//!     store.insert_item(ItemId(42)).await.unwrap();
//!     let clock = store.clock().await.unwrap();
//!     assert_eq!(clock.total(), 1);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Append-only**: items are never removed, so clock counters only grow
//! - **Idempotent inserts**: inserting a known item returns `AlreadyExists`
//!   and leaves the clock untouched

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use traits::{InsertResult, ItemStore, ItemStoreExt};
