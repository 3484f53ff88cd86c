//! One reconciliation set per partner.

use std::collections::HashMap;

use txrecon_core::{ItemId, PeerId, PeerPair, ReconciliationConfig};
use txrecon_sketch::Sketch;

use crate::error::Result;
use crate::reconcile::CompactReconciliationSet;

#[derive(Debug)]
struct PartnerSet {
    set: CompactReconciliationSet,
    base_seed: u64,
    iteration: u64,
}

/// Keeps a [`CompactReconciliationSet`] per partner, seeded from the pair
/// so both sides derive the same seeds without negotiating.
#[derive(Debug)]
pub struct ReconciliationSetsManager {
    me: PeerId,
    config: ReconciliationConfig,
    sets: HashMap<PeerId, PartnerSet>,
}

impl ReconciliationSetsManager {
    pub fn new(me: PeerId, config: ReconciliationConfig) -> Self {
        Self {
            me,
            config,
            sets: HashMap::new(),
        }
    }

    /// Create (or replace) the set for `partner`, filled with `items`.
    pub fn initialize(&mut self, partner: PeerId, items: &[ItemId]) -> Result<&CompactReconciliationSet> {
        let base_seed = PeerPair::new(self.me, partner).base_seed();
        let mut set = CompactReconciliationSet::new(self.config.sketch_kind, &self.config, base_seed)?;
        for &item in items {
            set.add_transaction(item);
        }
        let entry = PartnerSet {
            set,
            base_seed,
            iteration: 0,
        };
        self.sets.insert(partner, entry);
        Ok(&self.sets[&partner].set)
    }

    /// Add a new item to every partner's set.
    pub fn populate_tx(&mut self, item: ItemId) {
        for partner in self.sets.values_mut() {
            partner.set.add_transaction(item);
        }
    }

    /// Rotate the partner's seed and rebuild its sketch, dropping `settled`
    /// items for good.
    ///
    /// Iterations cycle modulo `bloom_max_seed`; the new seed is the base
    /// seed offset by the iteration.
    pub fn iterate(&mut self, partner: &PeerId, settled: &[ItemId]) -> Result<Option<u64>> {
        let Some(entry) = self.sets.get_mut(partner) else {
            return Ok(None);
        };
        entry.iteration = (entry.iteration + 1) % self.config.bloom_max_seed.max(1);
        let seed = entry.base_seed.wrapping_add(entry.iteration);
        let sketch = Sketch::new(entry.set.kind(), &self.config, seed)?;
        entry.set.recreate(sketch, settled);
        Ok(Some(seed))
    }

    pub fn set_for(&self, partner: &PeerId) -> Option<&CompactReconciliationSet> {
        self.sets.get(partner).map(|entry| &entry.set)
    }

    pub fn iteration(&self, partner: &PeerId) -> Option<u64> {
        self.sets.get(partner).map(|entry| entry.iteration)
    }

    pub fn remove(&mut self, partner: &PeerId) -> bool {
        self.sets.remove(partner).is_some()
    }

    pub fn partners(&self) -> impl Iterator<Item = &PeerId> {
        self.sets.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txrecon_core::SketchKind;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    fn manager(me: u8, kind: SketchKind) -> ReconciliationSetsManager {
        let config = ReconciliationConfig {
            sketch_kind: kind,
            sketch_size: 16,
            bloom_max_seed: 3,
            ..Default::default()
        };
        ReconciliationSetsManager::new(peer(me), config)
    }

    #[test]
    fn test_both_sides_share_seed() {
        let mut a = manager(1, SketchKind::Bloom);
        let mut b = manager(2, SketchKind::Bloom);
        let seed_a = a.initialize(peer(2), &[]).unwrap().seed();
        let seed_b = b.initialize(peer(1), &[]).unwrap().seed();
        assert_eq!(seed_a, seed_b);
        assert_eq!(seed_a, PeerPair::new(peer(1), peer(2)).base_seed());
    }

    #[test]
    fn test_populate_reaches_every_partner() {
        let mut m = manager(1, SketchKind::Invertible);
        m.initialize(peer(2), &[ItemId(1)]).unwrap();
        m.initialize(peer(3), &[]).unwrap();
        m.populate_tx(ItemId(9));

        assert!(m.set_for(&peer(2)).unwrap().contains(ItemId(9)));
        assert!(m.set_for(&peer(3)).unwrap().contains(ItemId(9)));
        assert_eq!(m.partners().count(), 2);
    }

    #[test]
    fn test_iterate_cycles_seed() {
        let mut m = manager(1, SketchKind::Bloom);
        let base = m.initialize(peer(2), &[ItemId(1), ItemId(2)]).unwrap().seed();

        assert_eq!(m.iterate(&peer(2), &[]).unwrap(), Some(base.wrapping_add(1)));
        assert_eq!(m.iterate(&peer(2), &[ItemId(1)]).unwrap(), Some(base.wrapping_add(2)));
        // bloom_max_seed = 3 wraps back to the base seed.
        assert_eq!(m.iterate(&peer(2), &[]).unwrap(), Some(base));

        let set = m.set_for(&peer(2)).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.is_settled(ItemId(1)));
        assert_eq!(m.iterate(&peer(9), &[]).unwrap(), None);
    }
}
