//! Partitioned sketch banks.
//!
//! Items are hash-partitioned into `n` cells so each partition carries its
//! own right-sized sketch and only failed partitions need a retry.
//!
//! - [`CmsBank`]: one [`InvertibleSketch`] per partition, plus an additive
//!   checksum per partition.
//! - [`PbsBank`]: one token sketch that identifies *which* partitions differ,
//!   plus per-partition XOR sums that resolve single-item differences.
//!
//! Every recovered item is re-hashed and must fall in the partition it was
//! decoded from; otherwise the decode is treated as spurious.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use txrecon_core::hashing::domain;
use txrecon_core::{fingerprint, seeded_hash, HashPartitioner, ItemId};

use crate::error::{Result, SketchError};
use crate::invertible::{item_salt, InvertibleSketch};

/// Why a partition could not be reconciled this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionFailure {
    /// The difference exceeded the partition's sketch capacity.
    CapacityExceeded,
    /// A decoded item does not belong to the partition.
    SpuriousRecovery,
    /// The decode disagrees with the partition checksums.
    ChecksumCollision,
}

/// Per-partition reconciliation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionOutcome {
    /// Both sides hold the same items.
    Identical,
    /// The full difference was recovered and checked.
    Recovered {
        /// Items only this side holds.
        local_only: Vec<ItemId>,
        /// Items only the peer holds.
        remote_only: Vec<ItemId>,
    },
    /// Nothing from this partition may be trusted.
    Failed(PartitionFailure),
}

impl PartitionOutcome {
    /// All recovered items, or `None` if the partition failed.
    pub fn recovered(&self) -> Option<Vec<ItemId>> {
        match self {
            PartitionOutcome::Identical => Some(Vec::new()),
            PartitionOutcome::Recovered {
                local_only,
                remote_only,
            } => {
                let mut all = local_only.clone();
                all.extend_from_slice(remote_only);
                all.sort();
                Some(all)
            }
            PartitionOutcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PartitionOutcome::Failed(_))
    }
}

/// Serialized state of a [`CmsBank`], exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDigest {
    /// Partition seed; both sides must use the same one.
    pub seed: u64,
    /// Serialized partition sketches.
    pub sketches: Vec<Vec<u8>>,
    /// Additive fingerprint checksum per partition.
    pub checksums: Vec<u64>,
}

impl BankDigest {
    pub fn partitions(&self) -> usize {
        self.sketches.len()
    }

    /// Capacity of each partition sketch.
    pub fn capacities(&self) -> Vec<usize> {
        self.sketches.iter().map(|s| s.len() / 8).collect()
    }

    /// Total serialized sketch bytes.
    pub fn sketch_bytes(&self) -> usize {
        self.sketches.iter().map(Vec::len).sum()
    }
}

/// Bank of per-partition invertible sketches with checksums.
#[derive(Debug, Clone)]
pub struct CmsBank {
    partitioner: HashPartitioner,
    salt: u64,
    sketches: Vec<InvertibleSketch>,
    checksums: Vec<u64>,
    members: Vec<BTreeSet<ItemId>>,
}

impl CmsBank {
    /// `n` partitions of capacity `capacity`.
    pub fn new(n: usize, capacity: usize, seed: u64) -> Self {
        Self::with_capacities(&vec![capacity; n], seed)
    }

    /// One partition per entry of `capacities`.
    pub fn with_capacities(capacities: &[usize], seed: u64) -> Self {
        let n = capacities.len();
        Self {
            partitioner: HashPartitioner::new(n, seed),
            salt: item_salt(seed),
            sketches: capacities.iter().map(|&c| InvertibleSketch::new(c)).collect(),
            checksums: vec![0; n],
            members: vec![BTreeSet::new(); n],
        }
    }

    pub fn partitions(&self) -> usize {
        self.sketches.len()
    }

    pub fn seed(&self) -> u64 {
        self.partitioner.seed()
    }

    pub fn capacities(&self) -> Vec<usize> {
        self.sketches.iter().map(InvertibleSketch::capacity).collect()
    }

    /// Partition an item is routed to.
    pub fn partition_of(&self, item: ItemId) -> usize {
        self.partitioner.cell(item)
    }

    /// Items held locally in partition `index`.
    pub fn members(&self, index: usize) -> Vec<ItemId> {
        self.members
            .get(index)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Add an item; adding an item already present has no effect.
    pub fn add(&mut self, item: ItemId) -> usize {
        let index = self.partitioner.cell(item);
        if self.sketches.is_empty() || !self.members[index].insert(item) {
            return index;
        }
        self.sketches[index].add(item.value() ^ self.salt);
        self.checksums[index] = self.checksums[index].wrapping_add(fingerprint(self.seed(), item));
        index
    }

    pub fn digest(&self) -> BankDigest {
        BankDigest {
            seed: self.seed(),
            sketches: self.sketches.iter().map(InvertibleSketch::serialize).collect(),
            checksums: self.checksums.clone(),
        }
    }

    /// Reconcile every partition against the peer's digest.
    ///
    /// Fails only when the digests are structurally incompatible; decode
    /// problems are reported per partition.
    pub fn reconcile(&self, peer: &BankDigest) -> Result<Vec<PartitionOutcome>> {
        if peer.seed != self.seed() {
            return Err(SketchError::ParameterMismatch(format!(
                "bank seed {} vs {}",
                self.seed(),
                peer.seed
            )));
        }
        if peer.sketches.len() != self.partitions() || peer.checksums.len() != self.partitions() {
            return Err(SketchError::ParameterMismatch(format!(
                "bank has {} partitions, peer sent {} sketches and {} checksums",
                self.partitions(),
                peer.sketches.len(),
                peer.checksums.len()
            )));
        }

        let mut outcomes = Vec::with_capacity(self.partitions());
        for index in 0..self.partitions() {
            let mut merged = self.sketches[index].clone();
            merged.merge(&peer.sketches[index])?;
            outcomes.push(self.resolve(index, &merged, peer.checksums[index]));
        }
        Ok(outcomes)
    }

    fn resolve(&self, index: usize, merged: &InvertibleSketch, peer_checksum: u64) -> PartitionOutcome {
        let local_checksum = self.checksums[index];
        let values = match merged.decode() {
            Ok(values) => values,
            Err(_) => return PartitionOutcome::Failed(PartitionFailure::CapacityExceeded),
        };

        if values.is_empty() {
            return if local_checksum == peer_checksum {
                PartitionOutcome::Identical
            } else {
                PartitionOutcome::Failed(PartitionFailure::ChecksumCollision)
            };
        }

        let items: Vec<ItemId> = values.into_iter().map(|v| ItemId(v ^ self.salt)).collect();
        if let Some(stray) = items.iter().find(|&&item| self.partitioner.cell(item) != index) {
            tracing::warn!(
                partition = index,
                item = %stray,
                "discarding partition with spurious recovery"
            );
            return PartitionOutcome::Failed(PartitionFailure::SpuriousRecovery);
        }

        let (local_only, remote_only): (Vec<ItemId>, Vec<ItemId>) =
            items.into_iter().partition(|item| self.members[index].contains(item));

        let seed = self.seed();
        let mut expected = local_checksum;
        for &item in &local_only {
            expected = expected.wrapping_sub(fingerprint(seed, item));
        }
        for &item in &remote_only {
            expected = expected.wrapping_add(fingerprint(seed, item));
        }
        if expected != peer_checksum {
            return PartitionOutcome::Failed(PartitionFailure::ChecksumCollision);
        }

        PartitionOutcome::Recovered {
            local_only,
            remote_only,
        }
    }
}

/// Bits of a PBS token carrying the partition fingerprint.
const TOKEN_FP_BITS: u32 = 48;
const TOKEN_FP_MASK: u64 = (1 << TOKEN_FP_BITS) - 1;
/// Largest partition count whose index fits in a token.
pub const PBS_MAX_PARTITIONS: usize = (1 << (64 - TOKEN_FP_BITS)) - 1;

/// Result of [`PbsBank::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PbsOutcome {
    /// Items only this side holds.
    pub local_only: Vec<ItemId>,
    /// Items only the peer holds.
    pub remote_only: Vec<ItemId>,
    /// Partitions whose difference is not a single checked item.
    pub unresolved: Vec<usize>,
}

impl PbsOutcome {
    /// Every recovered item, sorted.
    pub fn recovered(&self) -> Vec<ItemId> {
        let mut all = self.local_only.clone();
        all.extend_from_slice(&self.remote_only);
        all.sort();
        all
    }
}

/// Partition bank with a token sketch and per-partition XOR sums.
///
/// Each item must be added at most once.
#[derive(Debug, Clone)]
pub struct PbsBank {
    partitioner: HashPartitioner,
    token_capacity: usize,
    xor_sums: Vec<u64>,
    checksums: Vec<u64>,
}

impl PbsBank {
    /// `n` partitions; the token sketch can identify up to `capacity`
    /// differing partitions at once.
    pub fn new(n: usize, capacity: usize, seed: u64) -> Result<Self> {
        if n == 0 || n > PBS_MAX_PARTITIONS {
            return Err(SketchError::InvalidParameters(format!(
                "pbs partitions must be in 1..={}, got {}",
                PBS_MAX_PARTITIONS, n
            )));
        }
        Ok(Self {
            partitioner: HashPartitioner::new(n, seed),
            token_capacity: capacity,
            xor_sums: vec![0; n],
            checksums: vec![0; n],
        })
    }

    pub fn partitions(&self) -> usize {
        self.xor_sums.len()
    }

    pub fn seed(&self) -> u64 {
        self.partitioner.seed()
    }

    pub fn add(&mut self, item: ItemId) -> usize {
        let index = self.partitioner.cell(item);
        self.xor_sums[index] ^= item.value();
        self.checksums[index] = self.checksums[index].wrapping_add(fingerprint(self.seed(), item));
        index
    }

    pub fn xor_sums(&self) -> &[u64] {
        &self.xor_sums
    }

    pub fn checksums(&self) -> &[u64] {
        &self.checksums
    }

    /// Presence token of a partition, `None` while it is empty.
    fn token(&self, index: usize) -> Option<u64> {
        let (xor, sum) = (self.xor_sums[index], self.checksums[index]);
        if xor == 0 && sum == 0 {
            return None;
        }
        let mut data = [0u8; 16];
        data[..8].copy_from_slice(&xor.to_le_bytes());
        data[8..].copy_from_slice(&sum.to_le_bytes());
        let fp = seeded_hash(domain::PBS_TOKEN, self.seed(), &data) & TOKEN_FP_MASK;
        Some(((index as u64 + 1) << TOKEN_FP_BITS) | fp)
    }

    /// Sketch holding one token per non-empty partition.
    pub fn token_sketch(&self) -> InvertibleSketch {
        let mut sketch = InvertibleSketch::new(self.token_capacity);
        for index in 0..self.partitions() {
            if let Some(token) = self.token(index) {
                sketch.add(token);
            }
        }
        sketch
    }

    /// Indices of the partitions that differ from the peer's.
    pub fn identify(&self, peer_tokens: &[u8]) -> Result<Vec<usize>> {
        let mut sketch = self.token_sketch();
        sketch.merge(peer_tokens)?;
        let n = self.partitions();
        let indices: BTreeSet<usize> = sketch
            .decode()?
            .into_iter()
            .map(|token| (token >> TOKEN_FP_BITS) as usize)
            .filter(|&tagged| tagged >= 1 && tagged <= n)
            .map(|tagged| tagged - 1)
            .collect();
        Ok(indices.into_iter().collect())
    }

    /// Resolve the given partitions from the peer's XOR sums and checksums.
    ///
    /// A partition resolves only when its difference is a single item that
    /// hashes back into the partition and accounts for the checksum gap.
    pub fn reconcile(
        &self,
        indices: &[usize],
        peer_xor_sums: &[u64],
        peer_checksums: &[u64],
    ) -> Result<PbsOutcome> {
        let n = self.partitions();
        if peer_xor_sums.len() != n || peer_checksums.len() != n {
            return Err(SketchError::ParameterMismatch(format!(
                "pbs has {} partitions, peer sent {} xor sums and {} checksums",
                n,
                peer_xor_sums.len(),
                peer_checksums.len()
            )));
        }

        let seed = self.seed();
        let mut outcome = PbsOutcome::default();
        for &index in indices {
            if index >= n {
                continue;
            }
            let candidate = ItemId(self.xor_sums[index] ^ peer_xor_sums[index]);
            if candidate.value() == 0 || self.partitioner.cell(candidate) != index {
                outcome.unresolved.push(index);
                continue;
            }
            let fp = fingerprint(seed, candidate);
            let mine = self.checksums[index];
            let theirs = peer_checksums[index];
            if mine.wrapping_sub(fp) == theirs {
                outcome.local_only.push(candidate);
            } else if mine.wrapping_add(fp) == theirs {
                outcome.remote_only.push(candidate);
            } else {
                outcome.unresolved.push(index);
            }
        }
        outcome.local_only.sort();
        outcome.remote_only.sort();
        Ok(outcome)
    }
}
