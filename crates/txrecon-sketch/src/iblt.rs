//! Invertible Bloom lookup table.
//!
//! The table is split into `num_hashes` equal sub-tables and every key hashes
//! to exactly one cell in each, so a key never lands twice in the same cell.
//! Cells hold a signed count, XOR sums of keys and values, and an XOR sum of
//! key checks used to recognize pure cells.
//!
//! Subtracting a peer's table leaves only the symmetric difference: entries
//! with positive count were inserted on this side, negative on the other.

use std::collections::VecDeque;

use txrecon_core::hashing::domain;
use txrecon_core::{item_hash, ItemId};

use crate::error::{Result, SketchError};

/// Hash functions used by [`Iblt::with_expected_difference`].
pub const DEFAULT_HASHES: usize = 3;

/// Serialized header: cells (u32), hashes (u8), value size (u16), seed (u64).
const HEADER_LEN: usize = 4 + 1 + 2 + 8;

/// Largest parameters the serialized header can carry.
pub const MAX_NUM_CELLS: usize = u32::MAX as usize;
pub const MAX_NUM_HASHES: usize = u8::MAX as usize;
pub const MAX_VALUE_SIZE: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cell {
    count: i64,
    key_sum: u64,
    key_check: u64,
    value_sum: Vec<u8>,
}

impl Cell {
    fn empty(value_size: usize) -> Self {
        Self {
            count: 0,
            key_sum: 0,
            key_check: 0,
            value_sum: vec![0; value_size],
        }
    }

    fn is_zero(&self) -> bool {
        self.count == 0
            && self.key_sum == 0
            && self.key_check == 0
            && self.value_sum.iter().all(|&b| b == 0)
    }
}

/// Outcome of peeling a table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IbltDecode {
    /// Entries with positive sign (present on this side).
    pub inserted: Vec<(ItemId, Vec<u8>)>,
    /// Entries with negative sign (present on the subtracted side).
    pub removed: Vec<(ItemId, Vec<u8>)>,
    /// False when non-zero cells remained; the listing is then partial.
    pub complete: bool,
}

/// Result of a point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(Vec<u8>),
    Absent,
    /// Every cell of the key is shared with other keys.
    Unknown,
}

/// Invertible Bloom lookup table keyed by [`ItemId`] with fixed-width values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iblt {
    cells: Vec<Cell>,
    num_hashes: usize,
    value_size: usize,
    seed: u64,
}

impl Iblt {
    /// Create an empty table. `num_cells` is rounded up to a multiple of
    /// `num_hashes`.
    pub fn new(num_cells: usize, num_hashes: usize, value_size: usize, seed: u64) -> Result<Self> {
        if num_hashes == 0 || num_hashes > MAX_NUM_HASHES {
            return Err(SketchError::InvalidParameters(format!(
                "iblt hash functions must be in 1..={}, got {}",
                MAX_NUM_HASHES, num_hashes
            )));
        }
        if value_size > MAX_VALUE_SIZE {
            return Err(SketchError::InvalidParameters(format!(
                "iblt value size must be at most {}, got {}",
                MAX_VALUE_SIZE, value_size
            )));
        }
        let per_table = num_cells.div_ceil(num_hashes).max(1);
        if per_table.saturating_mul(num_hashes) > MAX_NUM_CELLS {
            return Err(SketchError::InvalidParameters(format!(
                "iblt cell count must be at most {}, got {}",
                MAX_NUM_CELLS, num_cells
            )));
        }
        Ok(Self {
            cells: vec![Cell::empty(value_size); per_table * num_hashes],
            num_hashes,
            value_size,
            seed,
        })
    }

    /// Table sized to peel a difference of about `d` entries.
    pub fn with_expected_difference(d: usize, value_size: usize, seed: u64) -> Result<Self> {
        let num_cells = d.saturating_mul(2).saturating_add(8);
        Self::new(num_cells, DEFAULT_HASHES, value_size, seed)
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// True when every cell is zero.
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Cell::is_zero)
    }

    fn indices(&self, key: ItemId) -> impl Iterator<Item = usize> + '_ {
        let per_table = (self.cells.len() / self.num_hashes) as u64;
        (0..self.num_hashes).map(move |j| {
            let h = item_hash(domain::IBLT_INDEX, self.seed.wrapping_add(j as u64), key);
            j * per_table as usize + (h % per_table) as usize
        })
    }

    fn check(&self, key: ItemId) -> u64 {
        item_hash(domain::IBLT_CHECK, self.seed, key)
    }

    fn apply(&mut self, key: ItemId, value: &[u8], delta: i64) {
        let check = self.check(key);
        let indices: Vec<usize> = self.indices(key).collect();
        for i in indices {
            let cell = &mut self.cells[i];
            cell.count += delta;
            cell.key_sum ^= key.value();
            cell.key_check ^= check;
            for (acc, b) in cell.value_sum.iter_mut().zip(value) {
                *acc ^= b;
            }
        }
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() != self.value_size {
            return Err(SketchError::LengthMismatch {
                expected: self.value_size,
                actual: value.len(),
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, key: ItemId, value: &[u8]) -> Result<()> {
        self.check_value(value)?;
        self.apply(key, value, 1);
        Ok(())
    }

    pub fn erase(&mut self, key: ItemId, value: &[u8]) -> Result<()> {
        self.check_value(value)?;
        self.apply(key, value, -1);
        Ok(())
    }

    fn ensure_compatible(&self, other: &Iblt) -> Result<()> {
        if self.cells.len() != other.cells.len()
            || self.num_hashes != other.num_hashes
            || self.value_size != other.value_size
            || self.seed != other.seed
        {
            return Err(SketchError::ParameterMismatch(format!(
                "iblt ({} cells, {} hashes, {} bytes, seed {}) vs ({}, {}, {}, {})",
                self.cells.len(),
                self.num_hashes,
                self.value_size,
                self.seed,
                other.cells.len(),
                other.num_hashes,
                other.value_size,
                other.seed
            )));
        }
        Ok(())
    }

    /// Cell-wise `self - other`.
    pub fn subtract(&mut self, other: &Iblt) -> Result<()> {
        self.ensure_compatible(other)?;
        for (mine, theirs) in self.cells.iter_mut().zip(&other.cells) {
            mine.count -= theirs.count;
            mine.key_sum ^= theirs.key_sum;
            mine.key_check ^= theirs.key_check;
            for (a, b) in mine.value_sum.iter_mut().zip(&theirs.value_sum) {
                *a ^= b;
            }
        }
        Ok(())
    }

    fn is_pure(&self, index: usize) -> bool {
        let cell = &self.cells[index];
        if cell.count.abs() != 1 {
            return false;
        }
        let key = ItemId(cell.key_sum);
        cell.key_check == self.check(key) && self.indices(key).any(|i| i == index)
    }

    /// Peel pure cells until none remain.
    pub fn decode(&self) -> IbltDecode {
        let mut table = self.clone();
        let mut out = IbltDecode::default();
        let mut queue: VecDeque<usize> = (0..table.cells.len()).filter(|&i| table.is_pure(i)).collect();
        let mut peels = 0;

        while let Some(index) = queue.pop_front() {
            if peels >= table.cells.len() {
                break;
            }
            if !table.is_pure(index) {
                continue;
            }
            let cell = &table.cells[index];
            let sign = cell.count;
            let key = ItemId(cell.key_sum);
            let value = cell.value_sum.clone();

            table.apply(key, &value, -sign);
            peels += 1;
            if sign > 0 {
                out.inserted.push((key, value));
            } else {
                out.removed.push((key, value));
            }

            let touched: Vec<usize> = table.indices(key).collect();
            queue.extend(touched.into_iter().filter(|&i| table.is_pure(i)));
        }

        out.complete = table.is_empty();
        out.inserted.sort();
        out.removed.sort();
        out
    }

    /// Every entry of a table that holds only insertions, or `None` if the
    /// listing would be partial.
    pub fn list_entries(&self) -> Option<Vec<(ItemId, Vec<u8>)>> {
        let decoded = self.decode();
        if decoded.complete && decoded.removed.is_empty() {
            Some(decoded.inserted)
        } else {
            None
        }
    }

    pub fn get(&self, key: ItemId) -> Lookup {
        for index in self.indices(key) {
            let cell = &self.cells[index];
            if cell.is_zero() {
                return Lookup::Absent;
            }
            if cell.count == 1 && self.is_pure(index) {
                return if cell.key_sum == key.value() {
                    Lookup::Found(cell.value_sum.clone())
                } else {
                    Lookup::Absent
                };
            }
        }
        Lookup::Unknown
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.cells.len() * (24 + self.value_size));
        out.extend_from_slice(&(self.cells.len() as u32).to_le_bytes());
        out.push(self.num_hashes as u8);
        out.extend_from_slice(&(self.value_size as u16).to_le_bytes());
        out.extend_from_slice(&self.seed.to_le_bytes());
        for cell in &self.cells {
            out.extend_from_slice(&cell.count.to_le_bytes());
            out.extend_from_slice(&cell.key_sum.to_le_bytes());
            out.extend_from_slice(&cell.key_check.to_le_bytes());
            out.extend_from_slice(&cell.value_sum);
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(SketchError::LengthMismatch {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let num_cells = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let num_hashes = bytes[4] as usize;
        let value_size = u16::from_le_bytes([bytes[5], bytes[6]]) as usize;
        let seed = read_u64(&bytes[7..15]);

        if num_hashes == 0 || num_cells == 0 || num_cells % num_hashes != 0 {
            return Err(SketchError::InvalidParameters(format!(
                "iblt with {} cells and {} hashes",
                num_cells, num_hashes
            )));
        }
        let cell_len = 24 + value_size;
        let expected = HEADER_LEN + num_cells * cell_len;
        if bytes.len() != expected {
            return Err(SketchError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        let cells = bytes[HEADER_LEN..]
            .chunks_exact(cell_len)
            .map(|c| Cell {
                count: read_u64(&c[0..8]) as i64,
                key_sum: read_u64(&c[8..16]),
                key_check: read_u64(&c[16..24]),
                value_sum: c[24..].to_vec(),
            })
            .collect();

        Ok(Self {
            cells,
            num_hashes,
            value_size,
            seed,
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}
