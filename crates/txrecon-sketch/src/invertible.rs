//! Algebraic invertible sketch (PinSketch over GF(2^64)).
//!
//! A sketch of capacity `c` stores the odd power sums
//! `s_1, s_3, ..., s_{2c-1}` of its elements. The representation is linear:
//! XOR-ing two serialized sketches yields the sketch of the symmetric
//! difference of their sets, so common elements cancel and the difference
//! can be decoded as long as it holds at most `c` elements.
//!
//! ## Decoding
//!
//! 1. Expand the odd sums into `s_1..s_2c` (`s_2k = s_k^2`).
//! 2. Berlekamp–Massey yields the locator polynomial of length `L`.
//! 3. The reciprocal locator must have `L` distinct roots in the field;
//!    those roots are the elements.
//! 4. The power sums of the recovered elements are recomputed and must
//!    match the sketch.
//!
//! Any failure is reported as [`SketchError::DecodeCapacityExceeded`].
//! Decoding is deterministic: the same sketch always yields the same
//! outcome.

use txrecon_core::hashing::domain;
use txrecon_core::seeded_hash;

use crate::error::{Result, SketchError};
use crate::field;

/// Bytes per serialized syndrome.
pub const WORD_BYTES: usize = 8;

/// Salt XOR-ed into item values before they enter a sketch.
///
/// Depends only on the seed, so both peers agree and the mapping from items
/// to field elements stays invertible.
pub fn item_salt(seed: u64) -> u64 {
    seeded_hash(domain::SKETCH_SALT, seed, &[])
}

/// Linear sketch with exact decoding of up to `capacity` differences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvertibleSketch {
    syndromes: Vec<u64>,
}

impl InvertibleSketch {
    /// Create an empty sketch able to decode `capacity` differences.
    pub fn new(capacity: usize) -> Self {
        Self {
            syndromes: vec![0; capacity],
        }
    }

    /// Declared decode capacity.
    pub fn capacity(&self) -> usize {
        self.syndromes.len()
    }

    /// Serialized size in bytes.
    pub fn serialized_len(&self) -> usize {
        self.syndromes.len() * WORD_BYTES
    }

    /// True when the sketch encodes the empty set.
    pub fn is_empty(&self) -> bool {
        self.syndromes.iter().all(|&s| s == 0)
    }

    /// Toggle `value` in the sketch. Adding the same value twice cancels.
    ///
    /// Zero is not a representable element and is ignored.
    pub fn add(&mut self, value: u64) {
        if value == 0 {
            tracing::warn!("ignoring zero element in invertible sketch");
            return;
        }
        let square = field::sqr(value);
        let mut power = value;
        for s in self.syndromes.iter_mut() {
            *s ^= power;
            power = field::mul(power, square);
        }
    }

    /// Serialize as `capacity` little-endian words.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_len());
        for s in &self.syndromes {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    /// Rebuild a sketch of the given capacity from its serialization.
    pub fn deserialize(capacity: usize, bytes: &[u8]) -> Result<Self> {
        let expected = capacity * WORD_BYTES;
        if bytes.len() != expected {
            return Err(SketchError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            syndromes: words(bytes),
        })
    }

    /// Merge a serialized peer sketch into this one.
    ///
    /// Equivalent to re-seeding with the byte-wise XOR of both
    /// serializations. When capacities differ the result keeps the smaller
    /// one, since a smaller sketch is a prefix of a larger one.
    pub fn merge(&mut self, other: &[u8]) -> Result<()> {
        if other.len() % WORD_BYTES != 0 {
            return Err(SketchError::LengthMismatch {
                expected: self.serialized_len(),
                actual: other.len(),
            });
        }
        let theirs = words(other);
        self.syndromes.truncate(theirs.len());
        for (mine, theirs) in self.syndromes.iter_mut().zip(theirs) {
            *mine ^= theirs;
        }
        Ok(())
    }

    /// Merge another in-memory sketch.
    pub fn merge_sketch(&mut self, other: &InvertibleSketch) {
        self.syndromes.truncate(other.syndromes.len());
        for (mine, theirs) in self.syndromes.iter_mut().zip(&other.syndromes) {
            *mine ^= theirs;
        }
    }

    /// Recover the encoded elements, sorted ascending.
    pub fn decode(&self) -> Result<Vec<u64>> {
        let capacity = self.capacity();
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let exceeded = SketchError::DecodeCapacityExceeded { capacity };

        let sums = self.power_sums();
        let (locator, length) = berlekamp_massey(&sums);
        if length > capacity || locator.get(length).copied().unwrap_or(0) == 0 {
            return Err(exceeded);
        }

        // Reciprocal of the locator: its roots are the elements themselves.
        let reciprocal: Vec<u64> = (0..=length).map(|j| locator[length - j]).collect();
        let mut roots = field::find_roots(&reciprocal).ok_or(exceeded.clone())?;

        let mut check = InvertibleSketch::new(capacity);
        for &r in &roots {
            check.add(r);
        }
        if check.syndromes != self.syndromes {
            return Err(exceeded);
        }

        roots.sort_unstable();
        Ok(roots)
    }

    /// Power sums `s_1..s_2c`.
    fn power_sums(&self) -> Vec<u64> {
        let n = 2 * self.capacity();
        let mut sums = vec![0u64; n];
        for j in 1..=n {
            sums[j - 1] = if j % 2 == 1 {
                self.syndromes[(j - 1) / 2]
            } else {
                field::sqr(sums[j / 2 - 1])
            };
        }
        sums
    }
}

fn words(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(WORD_BYTES)
        .map(|chunk| {
            let mut word = [0u8; WORD_BYTES];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
        .collect()
}

/// Shortest LFSR generating `sums`. Returns the connection polynomial
/// (with constant term 1, padded to `length + 1` coefficients) and its
/// length.
fn berlekamp_massey(sums: &[u64]) -> (Vec<u64>, usize) {
    let mut current = vec![1u64];
    let mut previous = vec![1u64];
    let mut length = 0usize;
    let mut gap = 1usize;
    let mut previous_discrepancy = 1u64;

    for n in 0..sums.len() {
        let mut discrepancy = sums[n];
        for i in 1..=length.min(current.len() - 1) {
            discrepancy ^= field::mul(current[i], sums[n - i]);
        }
        if discrepancy == 0 {
            gap += 1;
            continue;
        }

        let coef = field::mul(discrepancy, field::inv(previous_discrepancy));
        let snapshot = current.clone();
        if current.len() < previous.len() + gap {
            current.resize(previous.len() + gap, 0);
        }
        for (i, &p) in previous.iter().enumerate() {
            current[i + gap] ^= field::mul(coef, p);
        }

        if 2 * length <= n {
            length = n + 1 - length;
            previous = snapshot;
            previous_discrepancy = discrepancy;
            gap = 1;
        } else {
            gap += 1;
        }
    }

    current.truncate(length + 1);
    current.resize(length + 1, 0);
    (current, length)
}
