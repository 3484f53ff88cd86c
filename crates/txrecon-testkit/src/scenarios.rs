//! Named reconciliation scenarios.
//!
//! A scenario is two item sets plus the configuration to reconcile them
//! with. Scenarios serialize to JSON so a failing case can be saved and
//! replayed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use txrecon_core::{ItemId, ReconciliationConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub a: Vec<u64>,
    pub b: Vec<u64>,
    #[serde(default)]
    pub config: ReconciliationConfig,
}

impl Scenario {
    pub fn a_items(&self) -> Vec<ItemId> {
        self.a.iter().copied().map(ItemId).collect()
    }

    pub fn b_items(&self) -> Vec<ItemId> {
        self.b.iter().copied().map(ItemId).collect()
    }

    /// Items only `a` holds, sorted.
    pub fn only_a(&self) -> Vec<ItemId> {
        let b: BTreeSet<u64> = self.b.iter().copied().collect();
        let only: BTreeSet<u64> = self.a.iter().copied().filter(|i| !b.contains(i)).collect();
        only.into_iter().map(ItemId).collect()
    }

    /// Items only `b` holds, sorted.
    pub fn only_b(&self) -> Vec<ItemId> {
        let a: BTreeSet<u64> = self.a.iter().copied().collect();
        let only: BTreeSet<u64> = self.b.iter().copied().filter(|i| !a.contains(i)).collect();
        only.into_iter().map(ItemId).collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// The two-peer scenario with 10 items missing on each side: ten
/// partitions of capacity four, doubling, at most three rounds.
pub fn two_peer_scenario() -> Scenario {
    Scenario {
        name: "ten missing each way".into(),
        a: (1..=90).collect(),
        b: (1..=80).chain(500..510).collect(),
        config: ReconciliationConfig {
            n_cells: 10,
            sketch_size: 4,
            growth_factor: 2,
            max_rounds: 3,
            ..Default::default()
        },
    }
}

/// Get all scenarios.
pub fn all_scenarios() -> Vec<Scenario> {
    let small = ReconciliationConfig {
        n_cells: 4,
        sketch_size: 2,
        growth_factor: 2,
        max_rounds: 2,
        ..Default::default()
    };
    vec![
        two_peer_scenario(),
        Scenario {
            name: "identical".into(),
            a: (1..=64).collect(),
            b: (1..=64).collect(),
            config: small.clone(),
        },
        Scenario {
            name: "one side empty".into(),
            a: (1..=12).collect(),
            b: Vec::new(),
            config: small.clone(),
        },
        Scenario {
            name: "disjoint".into(),
            a: (1..=20).collect(),
            b: (101..=120).collect(),
            config: small,
        },
        Scenario {
            name: "single partition".into(),
            a: (1..=30).collect(),
            b: (5..=33).collect(),
            config: ReconciliationConfig {
                n_cells: 1,
                sketch_size: 8,
                max_rounds: 1,
                ..Default::default()
            },
        },
    ]
}
