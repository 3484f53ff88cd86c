//! # txrecon testkit
//!
//! Testing utilities for txrecon.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Scenarios**: Named set pairs with the configuration to reconcile them
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Peers on an in-memory network, ready to reconcile
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use txrecon_testkit::generators::set_pair;
//!
//! proptest! {
//!     #[test]
//!     fn difference_is_found(pair in set_pair(100, 10)) {
//!         // build two sessions from pair.a_items() / pair.b_items() ...
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use txrecon_testkit::fixtures::TwoPeers;
//!
//! let peers = TwoPeers::new(&config, &a_items, &b_items).await;
//! let _server = peers.b.spawn_responder();
//! peers.a.driver.reconcile_with(&peers.b.id).await?;
//! assert!(peers.converged().await);
//! ```

pub mod fixtures;
pub mod generators;
pub mod scenarios;

pub use fixtures::{multi_peer_fixtures, random_items, TestPeer, TwoPeers};
pub use generators::{set_pair, small_config, SetPair};
pub use scenarios::{all_scenarios, two_peer_scenario, Scenario};
