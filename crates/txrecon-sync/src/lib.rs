//! # txrecon sync
//!
//! Reconciliation protocol for converging transaction pools between peers.
//!
//! ## Overview
//!
//! Two flows are supported:
//!
//! - **Single sketch**: one Bloom filter, invertible sketch or IBLT per
//!   exchange, kept per partner by a [`ReconciliationSetsManager`].
//! - **Partitioned**: a [`ReconciliationSession`] exchanges one CMS bank
//!   per round, grows the partitions that failed, and falls back to
//!   explicit id lists for whatever is left when the round budget runs out.
//!
//! ## Key Properties
//!
//! - **Idempotent**: learned items are inserted with set semantics
//! - **Monotonic**: recovered items are never retracted within a session
//! - **Bounded**: a session never exceeds `max_rounds` round trips
//!
//! ## Message Flow
//!
//! ```text
//! Peer A                                  Peer B
//!   |-------- BankRequest(round 0) -------->|
//!   |<------- BankResponse(round 0) --------|
//!   |             ... up to max_rounds ...  |
//!   |-------- Fallback (if needed) -------->|
//!
//!   |-------- Request --------------------->|
//!   |<------- Response(txs) ----------------|
//!   |-------- Challenge(txs) -------------->|
//! ```

pub mod clocks;
pub mod convergence;
pub mod error;
pub mod manager;
pub mod messages;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod transport;

pub use clocks::ClockBook;
pub use convergence::{set_digest, store_digest, verify_convergence, ConvergenceResult};
pub use error::{Result, SyncError};
pub use manager::ReconciliationSetsManager;
pub use messages::{limits, ErrorCode, ReconMessage, PROTOCOL_VERSION};
pub use protocol::{ReconciliationDriver, SyncConfig, SyncReport};
pub use reconcile::{CompactReconciliationSet, ReconcileResult};
pub use session::{ReconciliationSession, RoundOutcome, SessionState};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
