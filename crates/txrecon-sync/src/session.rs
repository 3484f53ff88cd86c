//! Round-based partitioned reconciliation.
//!
//! A session reconciles one snapshot against one peer. Each round both
//! sides build a [`CmsBank`] over the same round seed and the same
//! capacities, exchange digests and decode. Decoding is symmetric, so both
//! sides agree on which partitions failed without extra messages.
//!
//! ```text
//!            digest()           decode()             advance()
//!   Build ─────────────▶ Exchanged ─────────▶ Decoded ─────────▶ Build (round + 1)
//!                                     │
//!                                     └──────▶ Done (no failures, or last round)
//! ```
//!
//! Items recovered in earlier rounds are kept: local-only and remote-only
//! sets only grow, and each side folds the remote-only items it learned
//! into its next bank so later rounds only chase what is still unknown.

use std::collections::{BTreeSet, HashSet};

use txrecon_core::{ItemId, PeerPair, ReconciliationConfig};
use txrecon_sketch::{BankDigest, CmsBank, PartitionFailure, PartitionOutcome};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The round's bank is (or is about to be) built.
    Build,
    /// The local digest has been handed to the transport.
    Exchanged,
    /// The peer's digest has been decoded and some partitions failed.
    Decoded,
    /// Nothing left to do.
    Done,
}

/// Summary of one decoded round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub round: u64,
    /// Remote-only items first learned this round.
    pub new_remote: Vec<ItemId>,
    /// Local-only items first learned this round.
    pub new_local: Vec<ItemId>,
    /// Failed partitions of this round's bank.
    pub failed: Vec<(usize, PartitionFailure)>,
    /// Failed partitions escalated to an explicit id exchange.
    pub fallback: Vec<usize>,
    pub done: bool,
}

#[derive(Debug)]
pub struct ReconciliationSession {
    pair: PeerPair,
    config: ReconciliationConfig,
    state: SessionState,
    round: u64,
    snapshot: HashSet<ItemId>,
    capacities: Vec<usize>,
    bank: Option<CmsBank>,
    suspects: Vec<usize>,
    fallback: Vec<usize>,
    unresolved: usize,
    local_only: BTreeSet<ItemId>,
    remote_only: BTreeSet<ItemId>,
}

impl ReconciliationSession {
    /// Start a session over `snapshot`. Every partition starts at
    /// `sketch_size`.
    pub fn new(pair: PeerPair, snapshot: impl IntoIterator<Item = ItemId>, config: &ReconciliationConfig) -> Self {
        Self {
            pair,
            config: config.clone(),
            state: SessionState::Build,
            round: 0,
            snapshot: snapshot.into_iter().collect(),
            capacities: vec![config.sketch_size; config.n_cells],
            bank: None,
            suspects: Vec::new(),
            fallback: Vec::new(),
            unresolved: 0,
            local_only: BTreeSet::new(),
            remote_only: BTreeSet::new(),
        }
    }

    pub fn pair(&self) -> &PeerPair {
        &self.pair
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn is_done(&self) -> bool {
        self.state == SessionState::Done
    }

    pub fn is_final_round(&self) -> bool {
        self.round + 1 >= self.config.max_rounds
    }

    /// Capacities of the current round's bank.
    pub fn capacities(&self) -> &[usize] {
        &self.capacities
    }

    /// Partitions that failed in the last decoded round.
    pub fn suspects(&self) -> &[usize] {
        &self.suspects
    }

    /// Partitions escalated to an explicit id exchange.
    pub fn fallback_partitions(&self) -> &[usize] {
        &self.fallback
    }

    /// Failed partitions left over once `max_sections` was reached.
    pub fn unresolved(&self) -> usize {
        self.unresolved
    }

    pub fn local_only(&self) -> Vec<ItemId> {
        self.local_only.iter().copied().collect()
    }

    pub fn remote_only(&self) -> Vec<ItemId> {
        self.remote_only.iter().copied().collect()
    }

    /// Adopt the requester's capacities for `round` and rebuild the bank.
    ///
    /// Used by the responding side, which never sizes partitions itself.
    pub fn mirror(&mut self, round: u64, peer: &BankDigest) -> Result<()> {
        if round != self.round {
            return Err(SyncError::RoundMismatch {
                expected: self.round,
                actual: round,
            });
        }
        if self.state != SessionState::Build {
            return Err(SyncError::InvalidState("mirror outside the build state"));
        }
        let seed = self.pair.round_seed(round);
        if peer.seed != seed {
            return Err(SyncError::InvalidMessage(format!(
                "bank seed {} does not match round seed {}",
                peer.seed, seed
            )));
        }
        if peer.partitions() != self.config.n_cells {
            return Err(SyncError::InvalidMessage(format!(
                "bank has {} partitions, expected {}",
                peer.partitions(),
                self.config.n_cells
            )));
        }
        self.capacities = peer.capacities();
        self.bank = Some(self.build_bank());
        Ok(())
    }

    /// The local digest for the current round.
    pub fn digest(&mut self) -> Result<BankDigest> {
        if self.state != SessionState::Build {
            return Err(SyncError::InvalidState("digest outside the build state"));
        }
        let bank = match self.bank.take() {
            Some(bank) => bank,
            None => self.build_bank(),
        };
        let digest = bank.digest();
        self.bank = Some(bank);
        self.state = SessionState::Exchanged;
        Ok(digest)
    }

    /// Decode the peer's digest for the current round.
    pub fn decode(&mut self, peer: &BankDigest) -> Result<RoundOutcome> {
        if self.state != SessionState::Exchanged {
            return Err(SyncError::InvalidState("decode before digest exchange"));
        }
        let Some(bank) = self.bank.as_ref() else {
            return Err(SyncError::InvalidState("no bank for this round"));
        };
        let outcomes = bank.reconcile(peer)?;

        let mut new_local = Vec::new();
        let mut new_remote = Vec::new();
        let mut failed = Vec::new();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                PartitionOutcome::Identical => {}
                PartitionOutcome::Recovered {
                    local_only,
                    remote_only,
                } => {
                    new_local.extend(local_only.into_iter().filter(|&i| self.local_only.insert(i)));
                    new_remote.extend(remote_only.into_iter().filter(|&i| self.remote_only.insert(i)));
                }
                PartitionOutcome::Failed(kind) => failed.push((index, kind)),
            }
        }

        self.suspects = failed.iter().map(|(index, _)| *index).collect();
        let done = failed.is_empty() || self.is_final_round();
        if done && !failed.is_empty() {
            let limit = self.config.max_sections;
            self.fallback = self.suspects.iter().copied().take(limit).collect();
            self.unresolved = self.suspects.len().saturating_sub(limit);
            if self.unresolved > 0 {
                tracing::warn!(
                    round = self.round,
                    unresolved = self.unresolved,
                    "round budget exhausted with partitions past max_sections"
                );
            }
        }

        tracing::debug!(
            round = self.round,
            recovered = new_local.len() + new_remote.len(),
            suspects = self.suspects.len(),
            done,
            "decoded reconciliation round"
        );

        self.state = if done {
            SessionState::Done
        } else {
            SessionState::Decoded
        };
        Ok(RoundOutcome {
            round: self.round,
            new_remote,
            new_local,
            failed,
            fallback: self.fallback.clone(),
            done,
        })
    }

    /// Move to the next round, growing the suspect partitions.
    pub fn advance(&mut self) -> Result<()> {
        if self.state != SessionState::Decoded {
            return Err(SyncError::InvalidState("advance before a decoded round"));
        }
        let growth = self.config.growth_factor;
        let mut capacities = vec![self.config.sketch_size; self.config.n_cells];
        for &index in &self.suspects {
            if let (Some(next), Some(prev)) = (capacities.get_mut(index), self.capacities.get(index)) {
                *next = prev.saturating_mul(growth);
            }
        }
        self.capacities = capacities;
        self.round += 1;
        self.bank = None;
        self.state = SessionState::Build;
        Ok(())
    }

    /// Local items in the escalated partitions, to send to the peer.
    pub fn fallback_ids(&self) -> Vec<ItemId> {
        let Some(bank) = self.bank.as_ref() else {
            return Vec::new();
        };
        let mut ids: Vec<ItemId> = self.fallback.iter().flat_map(|&i| bank.members(i)).collect();
        ids.sort();
        ids
    }

    /// Learn from the peer's ids for the escalated partitions.
    ///
    /// Ids the peer listed that are missing here become remote-only; local
    /// items of those partitions the peer did not list become local-only.
    /// Returns the remote-only items first learned here.
    pub fn absorb_fallback(&mut self, ids: &[ItemId]) -> Result<Vec<ItemId>> {
        let Some(bank) = self.bank.as_ref() else {
            return Err(SyncError::InvalidState("no bank to absorb a fallback into"));
        };
        let escalated: HashSet<usize> = self.fallback.iter().copied().collect();
        let listed: HashSet<ItemId> = ids.iter().copied().collect();

        let mut new_remote = Vec::new();
        for &id in ids {
            let partition = bank.partition_of(id);
            if !escalated.contains(&partition) {
                tracing::warn!(item = %id, partition, "ignoring fallback id outside escalated partitions");
                continue;
            }
            let held = self.snapshot.contains(&id) || self.remote_only.contains(&id);
            if !held && self.remote_only.insert(id) {
                new_remote.push(id);
            }
        }
        for &partition in &self.fallback {
            for item in bank.members(partition) {
                if !listed.contains(&item) {
                    self.local_only.insert(item);
                }
            }
        }
        Ok(new_remote)
    }

    fn build_bank(&self) -> CmsBank {
        let mut bank = CmsBank::with_capacities(&self.capacities, self.pair.round_seed(self.round));
        for &item in self.snapshot.iter().chain(&self.remote_only) {
            bank.add(item);
        }
        bank
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use txrecon_core::PeerId;

    fn pair() -> PeerPair {
        PeerPair::new(PeerId::from_bytes([1; 32]), PeerId::from_bytes([2; 32]))
    }

    fn config() -> ReconciliationConfig {
        ReconciliationConfig {
            n_cells: 10,
            sketch_size: 4,
            growth_factor: 2,
            max_rounds: 3,
            ..Default::default()
        }
    }

    fn ids(range: impl IntoIterator<Item = u64>) -> Vec<ItemId> {
        range.into_iter().map(ItemId).collect()
    }

    /// Drive two sessions to completion in-process. Returns the rounds used.
    fn run(a: &mut ReconciliationSession, b: &mut ReconciliationSession) -> u64 {
        loop {
            let request = a.digest().unwrap();
            b.mirror(a.round(), &request).unwrap();
            let response = b.digest().unwrap();
            let out_b = b.decode(&request).unwrap();
            let out_a = a.decode(&response).unwrap();
            assert_eq!(out_a.failed, out_b.failed);

            if out_a.done {
                assert!(out_b.done);
                if !out_a.fallback.is_empty() {
                    let from_b = b.fallback_ids();
                    let from_a = a.fallback_ids();
                    a.absorb_fallback(&from_b).unwrap();
                    b.absorb_fallback(&from_a).unwrap();
                }
                return a.round() + 1;
            }
            a.advance().unwrap();
            b.advance().unwrap();
        }
    }

    #[test]
    fn test_identical_sets_finish_in_one_round() {
        let mut a = ReconciliationSession::new(pair(), ids(1..=50), &config());
        let mut b = ReconciliationSession::new(pair(), ids(1..=50), &config());
        assert_eq!(run(&mut a, &mut b), 1);
        assert!(a.local_only().is_empty() && a.remote_only().is_empty());
    }

    #[test]
    fn test_recovers_symmetric_difference() {
        let mut a = ReconciliationSession::new(pair(), ids(1..=90), &config());
        let mut b = ReconciliationSession::new(pair(), ids((1..=80).chain(500..510)), &config());
        let rounds = run(&mut a, &mut b);
        assert!(rounds <= 3);

        assert_eq!(a.local_only(), ids(81..=90));
        assert_eq!(a.remote_only(), ids(500..510));
        assert_eq!(b.local_only(), ids(500..510));
        assert_eq!(b.remote_only(), ids(81..=90));
    }

    #[test]
    fn test_suspects_grow() {
        let cfg = ReconciliationConfig {
            n_cells: 2,
            sketch_size: 1,
            ..config()
        };
        let mut a = ReconciliationSession::new(pair(), ids(1..=40), &cfg);
        let mut b = ReconciliationSession::new(pair(), ids(21..=40), &cfg);
        let request = a.digest().unwrap();
        b.mirror(0, &request).unwrap();
        let response = b.digest().unwrap();
        let outcome = a.decode(&response).unwrap();
        assert!(!outcome.failed.is_empty());

        a.advance().unwrap();
        assert_eq!(a.round(), 1);
        for (index, &cap) in a.capacities().iter().enumerate() {
            let expected = if a.suspects().contains(&index) { 2 } else { 1 };
            assert_eq!(cap, expected);
        }
    }

    #[test]
    fn test_single_round_budget_falls_back() {
        let cfg = ReconciliationConfig {
            n_cells: 2,
            sketch_size: 1,
            max_rounds: 1,
            ..config()
        };
        let mut a = ReconciliationSession::new(pair(), ids(1..=40), &cfg);
        let mut b = ReconciliationSession::new(pair(), ids(11..=50), &cfg);
        assert_eq!(run(&mut a, &mut b), 1);
        assert!(!a.fallback_partitions().is_empty());
        assert_eq!(a.local_only(), ids(1..=10));
        assert_eq!(a.remote_only(), ids(41..=50));
        assert_eq!(b.remote_only(), ids(1..=10));
    }

    #[test]
    fn test_fallback_ignores_foreign_partitions() {
        let cfg = ReconciliationConfig {
            n_cells: 4,
            sketch_size: 1,
            max_rounds: 1,
            max_sections: 1,
            ..config()
        };
        let mut a = ReconciliationSession::new(pair(), ids(1..=100), &cfg);
        let mut b = ReconciliationSession::new(pair(), ids(51..=150), &cfg);
        let request = a.digest().unwrap();
        b.mirror(0, &request).unwrap();
        let response = b.digest().unwrap();
        let outcome = a.decode(&response).unwrap();
        assert!(outcome.done);
        assert_eq!(outcome.fallback.len(), 1);
        assert_eq!(a.unresolved(), outcome.failed.len() - 1);

        // Every id of the peer is offered; only the escalated partition counts.
        let learned = a.absorb_fallback(&ids(51..=150)).unwrap();
        assert!(!learned.is_empty());
        assert!(learned.len() < 50);
        assert!(learned.iter().all(|i| i.0 > 100));
    }

    #[test]
    fn test_state_machine_guards() {
        let mut a = ReconciliationSession::new(pair(), ids(1..=5), &config());
        assert!(matches!(a.advance(), Err(SyncError::InvalidState(_))));
        let digest = a.digest().unwrap();
        assert!(a.digest().is_err());
        assert!(matches!(
            a.mirror(0, &digest),
            Err(SyncError::InvalidState(_))
        ));

        let mut b = ReconciliationSession::new(pair(), ids(1..=5), &config());
        assert!(matches!(
            b.mirror(1, &digest),
            Err(SyncError::RoundMismatch {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_mirror_rejects_foreign_seed() {
        let other = PeerPair::new(PeerId::from_bytes([1; 32]), PeerId::from_bytes([3; 32]));
        let mut a = ReconciliationSession::new(other, ids(1..=5), &config());
        let digest = a.digest().unwrap();
        let mut b = ReconciliationSession::new(pair(), ids(1..=5), &config());
        assert!(matches!(b.mirror(0, &digest), Err(SyncError::InvalidMessage(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_sessions_find_exact_difference(
            shared in prop::collection::btree_set(1u64..1_000_000, 0..60),
            only_a in prop::collection::btree_set(1_000_000u64..2_000_000, 0..15),
            only_b in prop::collection::btree_set(2_000_000u64..3_000_000, 0..15),
        ) {
            let a_items: BTreeSet<u64> = shared.union(&only_a).copied().collect();
            let b_items: BTreeSet<u64> = shared.union(&only_b).copied().collect();
            let mut a = ReconciliationSession::new(pair(), ids(a_items), &config());
            let mut b = ReconciliationSession::new(pair(), ids(b_items), &config());
            run(&mut a, &mut b);

            prop_assert_eq!(a.local_only(), ids(only_a.iter().copied()));
            prop_assert_eq!(a.remote_only(), ids(only_b.iter().copied()));
            prop_assert_eq!(b.remote_only(), ids(only_a));
        }
    }
}
