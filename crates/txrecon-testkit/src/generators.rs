//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;

use txrecon_core::{ItemId, PeerId, ReconciliationConfig, SketchKind};

/// Width of each disjoint id band used by [`set_pair`].
const BAND: u64 = 1 << 40;

/// Generate a random ItemId.
pub fn item_id() -> impl Strategy<Value = ItemId> {
    any::<u64>().prop_map(ItemId)
}

/// Generate a random PeerId.
pub fn peer_id() -> impl Strategy<Value = PeerId> {
    any::<[u8; 32]>().prop_map(PeerId::from_bytes)
}

/// Generate a sketch kind.
pub fn sketch_kind() -> impl Strategy<Value = SketchKind> {
    prop_oneof![
        Just(SketchKind::Bloom),
        Just(SketchKind::Invertible),
        Just(SketchKind::Iblt),
    ]
}

/// Two item sets described by their overlap.
#[derive(Debug, Clone)]
pub struct SetPair {
    pub shared: BTreeSet<ItemId>,
    pub only_a: BTreeSet<ItemId>,
    pub only_b: BTreeSet<ItemId>,
}

impl SetPair {
    pub fn a_items(&self) -> Vec<ItemId> {
        self.shared.union(&self.only_a).copied().collect()
    }

    pub fn b_items(&self) -> Vec<ItemId> {
        self.shared.union(&self.only_b).copied().collect()
    }

    /// Size of the symmetric difference.
    pub fn difference(&self) -> usize {
        self.only_a.len() + self.only_b.len()
    }
}

fn band(index: u64, max_len: usize) -> impl Strategy<Value = BTreeSet<ItemId>> {
    let start = 1 + index * BAND;
    prop::collection::btree_set((start..start + BAND).prop_map(ItemId), 0..=max_len)
}

/// Two sets with up to `max_shared` common items and up to `max_diff`
/// items private to each side. The three parts are disjoint by
/// construction.
pub fn set_pair(max_shared: usize, max_diff: usize) -> impl Strategy<Value = SetPair> {
    (band(0, max_shared), band(1, max_diff), band(2, max_diff)).prop_map(
        |(shared, only_a, only_b)| SetPair {
            shared,
            only_a,
            only_b,
        },
    )
}

/// A small partitioned-protocol configuration whose fallback covers every
/// partition, so sessions always end with the exact difference.
pub fn small_config() -> impl Strategy<Value = ReconciliationConfig> {
    (1usize..=16, 1usize..=8, 2usize..=4, 1u64..=4).prop_map(
        |(n_cells, sketch_size, growth_factor, max_rounds)| ReconciliationConfig {
            n_cells,
            sketch_size,
            growth_factor,
            max_rounds,
            max_sections: n_cells,
            ..Default::default()
        },
    )
}
