//! Seeded Bloom filter.
//!
//! Hash function `i` hashes the item under seed `seed + i`, so two peers
//! sharing `(size, num_func, seed)` set identical positions for identical
//! items and their filters can be compared bit by bit.

use txrecon_core::hashing::domain;
use txrecon_core::{item_hash, ItemId, SketchKind};

use crate::error::{Result, SketchError};
use crate::sketch::CompactSketch;

/// Bloom filter over [`ItemId`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    /// Packed bits, most significant bit first.
    bits: Vec<u8>,
    num_func: usize,
    seed: u64,
    checksum: u32,
    count: usize,
}

impl BloomFilter {
    /// Create an empty filter. `size` is in bits, rounded up to whole bytes.
    pub fn new(size: usize, num_func: usize, seed: u64) -> Self {
        Self {
            bits: vec![0; size.div_ceil(8)],
            num_func,
            seed,
            checksum: 0,
            count: 0,
        }
    }

    /// Rebuild a filter from its packed bits.
    ///
    /// The checksum and item count are not part of the bit array; use
    /// [`BloomFilter::from_compact`] to carry the checksum across.
    pub fn from_bytes(bytes: &[u8], num_func: usize, seed: u64) -> Self {
        Self {
            bits: bytes.to_vec(),
            num_func,
            seed,
            checksum: 0,
            count: 0,
        }
    }

    /// Size in bits.
    pub fn size(&self) -> usize {
        self.bits.len() * 8
    }

    pub fn num_func(&self) -> usize {
        self.num_func
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of items added to this instance.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// XOR fold of every added item, 32 bits wide.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Bit positions for `item`, one per hash function.
    pub fn positions(&self, item: ItemId) -> Vec<usize> {
        let size = self.size() as u64;
        if size == 0 {
            return Vec::new();
        }
        (0..self.num_func as u64)
            .map(|i| (item_hash(domain::BLOOM, self.seed.wrapping_add(i), item) % size) as usize)
            .collect()
    }

    /// Add an item and return the positions it set.
    pub fn add(&mut self, item: ItemId) -> Vec<usize> {
        let positions = self.positions(item);
        for &p in &positions {
            self.set(p);
        }
        self.checksum ^= fold32(item.value());
        self.count += 1;
        positions
    }

    /// False means definitely absent; true means probably present.
    pub fn maybe_contains(&self, item: ItemId) -> bool {
        if self.bits.is_empty() {
            return false;
        }
        self.positions(item).into_iter().all(|p| self.get(p))
    }

    /// Whether the bit at `position` is set.
    pub fn get(&self, position: usize) -> bool {
        self.bits
            .get(position / 8)
            .is_some_and(|byte| byte & (0x80 >> (position % 8)) != 0)
    }

    fn set(&mut self, position: usize) {
        if let Some(byte) = self.bits.get_mut(position / 8) {
            *byte |= 0x80 >> (position % 8);
        }
    }

    /// Packed bits, MSB first.
    pub fn serialize(&self) -> Vec<u8> {
        self.bits.clone()
    }

    /// Positions set in `self` but clear in `other`.
    pub fn diff(&self, other: &BloomFilter) -> Result<Vec<usize>> {
        if self.bits.len() != other.bits.len() {
            return Err(SketchError::LengthMismatch {
                expected: self.bits.len(),
                actual: other.bits.len(),
            });
        }
        let mut out = Vec::new();
        for (i, (&mine, &theirs)) in self.bits.iter().zip(&other.bits).enumerate() {
            let only_mine = mine & !theirs;
            for bit in 0..8 {
                if only_mine & (0x80 >> bit) != 0 {
                    out.push(i * 8 + bit);
                }
            }
        }
        Ok(out)
    }

    /// `(1 - e^(-kn/m))^k` for `n` inserted items.
    pub fn theoretical_fp_rate(&self, n: usize) -> f64 {
        let m = self.size() as f64;
        if m == 0.0 {
            return 1.0;
        }
        let k = self.num_func as f64;
        (1.0 - (-k * n as f64 / m).exp()).powf(k)
    }

    /// False-positive rate implied by the current bit density.
    pub fn estimated_fp_rate(&self) -> f64 {
        let m = self.size();
        if m == 0 {
            return 1.0;
        }
        let ones: u32 = self.bits.iter().map(|b| b.count_ones()).sum();
        (f64::from(ones) / m as f64).powi(self.num_func as i32)
    }

    /// Wire form: packed bits, seed and checksum.
    pub fn to_compact(&self) -> CompactSketch {
        CompactSketch {
            kind: SketchKind::Bloom,
            data: self.serialize(),
            seed: self.seed,
            checksum: u64::from(self.checksum),
        }
    }

    /// Rebuild from wire form. `num_func` is a shared configuration value.
    pub fn from_compact(compact: &CompactSketch, num_func: usize) -> Result<Self> {
        if compact.kind != SketchKind::Bloom {
            return Err(SketchError::ParameterMismatch(format!(
                "expected bloom sketch, got {:?}",
                compact.kind
            )));
        }
        let mut filter = Self::from_bytes(&compact.data, num_func, compact.seed);
        filter.checksum = compact.checksum as u32;
        Ok(filter)
    }
}

fn fold32(value: u64) -> u32 {
    ((value >> 32) ^ value) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut bf = BloomFilter::new(800, 2, 17);
        for i in 0..100u64 {
            bf.add(ItemId(i * 31 + 7));
        }
        for i in 0..100u64 {
            assert!(bf.maybe_contains(ItemId(i * 31 + 7)));
        }
        assert_eq!(bf.len(), 100);
    }

    #[test]
    fn test_add_returns_positions() {
        let mut bf = BloomFilter::new(64, 3, 1);
        let positions = bf.add(ItemId(5));
        assert_eq!(positions.len(), 3);
        for p in positions {
            assert!(p < 64);
            assert!(bf.get(p));
        }
    }

    #[test]
    fn test_same_parameters_same_bits() {
        let mut a = BloomFilter::new(256, 2, 9);
        let mut b = BloomFilter::new(256, 2, 9);
        for i in 0..20 {
            a.add(ItemId(i));
        }
        for i in (0..20).rev() {
            b.add(ItemId(i));
        }
        assert_eq!(a.serialize(), b.serialize());
        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_different_seed_different_positions() {
        let a = BloomFilter::new(1024, 4, 1);
        let b = BloomFilter::new(1024, 4, 2);
        let differs = (0..32).any(|i| a.positions(ItemId(i)) != b.positions(ItemId(i)));
        assert!(differs);
    }

    #[test]
    fn test_serialize_msb_first() {
        let mut bf = BloomFilter::new(16, 1, 0);
        bf.set(0);
        bf.set(9);
        assert_eq!(bf.serialize(), vec![0x80, 0x40]);
    }

    #[test]
    fn test_checksum_xor_fold() {
        let mut bf = BloomFilter::new(64, 1, 0);
        bf.add(ItemId(0x0000_0001_0000_0002));
        assert_eq!(bf.checksum(), 3);
        bf.add(ItemId(0x0000_0001_0000_0002));
        assert_eq!(bf.checksum(), 0);
    }

    #[test]
    fn test_diff_positions() {
        let mut a = BloomFilter::new(512, 2, 3);
        let mut b = BloomFilter::new(512, 2, 3);
        for i in 0..10 {
            a.add(ItemId(i));
            b.add(ItemId(i));
        }
        let extra = a.add(ItemId(999));
        let diff = a.diff(&b).unwrap();
        assert!(diff.iter().all(|p| extra.contains(p)));
        assert!(b.diff(&a).unwrap().is_empty());

        let short = BloomFilter::new(8, 2, 3);
        assert!(a.diff(&short).is_err());
    }

    #[test]
    fn test_compact_roundtrip_keeps_checksum() {
        let mut bf = BloomFilter::new(800, 2, 44);
        for i in 1..50 {
            bf.add(ItemId(i));
        }
        let compact = bf.to_compact();
        let back = BloomFilter::from_compact(&compact, 2).unwrap();
        assert_eq!(back.serialize(), bf.serialize());
        assert_eq!(back.checksum(), bf.checksum());
        assert_eq!(back.seed(), 44);
        for i in 1..50 {
            assert!(back.maybe_contains(ItemId(i)));
        }
    }

    #[test]
    fn test_false_positive_rate_bound() {
        let (m, k, n) = (1000, 3, 100);
        let mut bf = BloomFilter::new(m, k, 2024);
        for i in 0..n as u64 {
            bf.add(ItemId(i));
        }

        let probes = 10_000u64;
        let false_positives = (0..probes)
            .filter(|i| bf.maybe_contains(ItemId(1_000_000 + i)))
            .count();
        let measured = false_positives as f64 / probes as f64;
        let bound = bf.theoretical_fp_rate(n);

        assert!(
            measured <= bound * 1.5,
            "measured {} exceeds 1.5x theoretical {}",
            measured,
            bound
        );
        assert!(bf.estimated_fp_rate() > 0.0);
    }
}
