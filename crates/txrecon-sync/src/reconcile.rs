//! Single-sketch reconciliation set.
//!
//! Couples one [`Sketch`] with the bookkeeping needed to turn a sketch
//! comparison back into item ids. A Bloom filter only reports positions,
//! so the set keeps a position → items index. The exact variants decode
//! ids directly and only need the membership set to tell the sides apart.

use std::collections::{BTreeSet, HashMap, HashSet};

use txrecon_core::{fingerprint, ItemId, ReconciliationConfig, SketchKind};
use txrecon_sketch::{CompactSketch, Sketch, SketchDiff};

use crate::error::Result;

/// What a single-sketch comparison revealed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Items held here that the peer lacks.
    pub local_only: Vec<ItemId>,
    /// Items the peer holds that are missing here. Always empty for Bloom.
    pub remote_only: Vec<ItemId>,
    /// True when the result is the full symmetric difference.
    pub exhaustive: bool,
}

impl ReconcileResult {
    pub fn is_empty(&self) -> bool {
        self.local_only.is_empty() && self.remote_only.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CompactReconciliationSet {
    sketch: Sketch,
    /// Items in the sketch, in insertion order.
    items: Vec<ItemId>,
    members: HashSet<ItemId>,
    /// Bloom position -> items that set it.
    positions: HashMap<usize, Vec<ItemId>>,
    /// Items excluded from every future sketch.
    settled: HashSet<ItemId>,
}

impl CompactReconciliationSet {
    /// An empty set of `kind` sized from `config`.
    pub fn new(kind: SketchKind, config: &ReconciliationConfig, seed: u64) -> Result<Self> {
        Ok(Self::with_sketch(Sketch::new(kind, config, seed)?))
    }

    /// Wrap an empty sketch.
    pub fn with_sketch(sketch: Sketch) -> Self {
        Self {
            sketch,
            items: Vec::new(),
            members: HashSet::new(),
            positions: HashMap::new(),
            settled: HashSet::new(),
        }
    }

    pub fn kind(&self) -> SketchKind {
        self.sketch.kind()
    }

    pub fn seed(&self) -> u64 {
        self.sketch.seed()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item: ItemId) -> bool {
        self.members.contains(&item)
    }

    pub fn is_settled(&self, item: ItemId) -> bool {
        self.settled.contains(&item)
    }

    /// Add an item to the sketch. Returns false if it was already present
    /// or has been settled.
    pub fn add_transaction(&mut self, item: ItemId) -> bool {
        if self.settled.contains(&item) || !self.members.insert(item) {
            return false;
        }
        self.items.push(item);
        for position in self.sketch.add(item) {
            self.positions.entry(position).or_default().push(item);
        }
        true
    }

    /// Rebuild around `new_sketch`, which must be empty.
    ///
    /// Items in `exclude` join the settled set and are left out of this and
    /// every later rebuild.
    pub fn recreate(&mut self, new_sketch: Sketch, exclude: &[ItemId]) {
        self.settled.extend(exclude.iter().copied());
        let items = std::mem::take(&mut self.items);
        self.sketch = new_sketch;
        self.members.clear();
        self.positions.clear();
        for item in items {
            self.add_transaction(item);
        }
    }

    /// Compare with the peer's sketch.
    pub fn reconcile(&self, peer: &CompactSketch) -> Result<ReconcileResult> {
        match self.sketch.diff(peer)? {
            SketchDiff::Positions(positions) => {
                let local_only: BTreeSet<ItemId> = positions
                    .iter()
                    .filter_map(|p| self.positions.get(p))
                    .flatten()
                    .copied()
                    .collect();
                Ok(ReconcileResult {
                    local_only: local_only.into_iter().collect(),
                    remote_only: Vec::new(),
                    exhaustive: false,
                })
            }
            SketchDiff::Symmetric { items, complete } => {
                // An over-full invertible sketch can decode to garbage that
                // looks complete; the fingerprint sums catch it.
                if complete && !self.balances(&items, peer.checksum) {
                    tracing::debug!(recovered = items.len(), "decoded difference fails the checksum");
                    return Ok(ReconcileResult::default());
                }
                let (local_only, remote_only) = items
                    .into_iter()
                    .filter(|item| !self.settled.contains(item))
                    .partition(|item| self.members.contains(item));
                Ok(ReconcileResult {
                    local_only,
                    remote_only,
                    exhaustive: complete,
                })
            }
        }
    }

    pub fn to_compact(&self) -> CompactSketch {
        self.sketch.to_compact()
    }

    /// Whether moving `difference` across turns our checksum into the peer's.
    fn balances(&self, difference: &[ItemId], peer_checksum: u64) -> bool {
        let seed = self.seed();
        let expected = difference.iter().fold(self.sketch.checksum(), |sum, &item| {
            if self.members.contains(&item) {
                sum.wrapping_sub(fingerprint(seed, item))
            } else {
                sum.wrapping_add(fingerprint(seed, item))
            }
        });
        expected == peer_checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReconciliationConfig {
        ReconciliationConfig {
            sketch_size: 16,
            bloom_size: 4096,
            bloom_num_func: 3,
            ..Default::default()
        }
    }

    fn set_of(kind: SketchKind, items: impl IntoIterator<Item = u64>) -> CompactReconciliationSet {
        let mut set = CompactReconciliationSet::new(kind, &config(), 42).unwrap();
        for i in items {
            set.add_transaction(ItemId(i));
        }
        set
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut set = set_of(SketchKind::Bloom, [1, 2]);
        assert!(!set.add_transaction(ItemId(1)));
        assert!(set.add_transaction(ItemId(3)));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_bloom_finds_items_peer_lacks() {
        let a = set_of(SketchKind::Bloom, 1..=50);
        let b = set_of(SketchKind::Bloom, 1..=45);

        let result = a.reconcile(&b.to_compact()).unwrap();
        assert!(!result.exhaustive);
        assert!(result.remote_only.is_empty());
        // Definitely-missing only: every reported item really is missing.
        assert!(result.local_only.iter().all(|i| i.0 > 45));
        assert!(!result.local_only.is_empty());

        let back = b.reconcile(&a.to_compact()).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_exact_variants_split_sides() {
        for kind in [SketchKind::Invertible, SketchKind::Iblt] {
            let a = set_of(kind, (1..=30).chain([100, 101]));
            let b = set_of(kind, (1..=30).chain([200]));

            let result = a.reconcile(&b.to_compact()).unwrap();
            assert!(result.exhaustive, "{:?}", kind);
            assert_eq!(result.local_only, vec![ItemId(100), ItemId(101)]);
            assert_eq!(result.remote_only, vec![ItemId(200)]);
        }
    }

    #[test]
    fn test_recreate_excludes_settled() {
        let mut set = set_of(SketchKind::Invertible, 1..=10);
        let fresh = Sketch::new(SketchKind::Invertible, &config(), 43).unwrap();
        set.recreate(fresh, &[ItemId(1), ItemId(2)]);

        assert_eq!(set.seed(), 43);
        assert_eq!(set.len(), 8);
        assert!(!set.contains(ItemId(1)));
        assert!(set.is_settled(ItemId(2)));
        assert!(!set.add_transaction(ItemId(2)));

        let mut peer = CompactReconciliationSet::new(SketchKind::Invertible, &config(), 43).unwrap();
        for i in 3..=10 {
            peer.add_transaction(ItemId(i));
        }
        assert!(set.reconcile(&peer.to_compact()).unwrap().is_empty());
    }

    #[test]
    fn test_invertible_overflow_recovers_nothing() {
        let a = set_of(SketchKind::Invertible, 1..=60);
        let b = set_of(SketchKind::Invertible, 1..=10);

        let result = a.reconcile(&b.to_compact()).unwrap();
        assert!(result.is_empty());
        assert!(!result.exhaustive);
    }

    #[test]
    fn test_unbalanced_checksum_discards_decode() {
        let a = set_of(SketchKind::Invertible, (1..=30).chain([100]));
        let b = set_of(SketchKind::Invertible, 1..=30);
        let mut forged = b.to_compact();
        forged.checksum = forged.checksum.wrapping_add(1);

        let result = a.reconcile(&forged).unwrap();
        assert!(result.is_empty());
        assert!(!result.exhaustive);
    }

    #[test]
    fn test_seed_mismatch_errors() {
        let a = set_of(SketchKind::Iblt, 1..5);
        let b = CompactReconciliationSet::new(SketchKind::Iblt, &config(), 7).unwrap();
        assert!(a.reconcile(&b.to_compact()).is_err());
    }
}
