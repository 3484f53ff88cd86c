//! Last known clocks of remote peers.

use std::collections::HashMap;

use txrecon_core::{inconsistent, progressive, PeerClock, PeerId};

use crate::error::{Result, SyncError};

#[derive(Debug, Default)]
pub struct ClockBook {
    clocks: HashMap<PeerId, PeerClock>,
}

impl ClockBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a clock received from `peer`.
    ///
    /// A peer's counts only grow, so a clock that moved backwards in some
    /// cell and forwards in another is rejected and the stored clock is
    /// kept. Otherwise the stored clock absorbs it cell-wise.
    pub fn update(&mut self, peer: PeerId, clock: PeerClock) -> Result<()> {
        match self.clocks.get_mut(&peer) {
            Some(known) => {
                if inconsistent(known, &clock) {
                    tracing::warn!(%peer, "rejecting inconsistent clock");
                    return Err(SyncError::InconsistentClock(peer));
                }
                known.merge(&clock)?;
            }
            None => {
                self.clocks.insert(peer, clock);
            }
        }
        Ok(())
    }

    pub fn get(&self, peer: &PeerId) -> Option<&PeerClock> {
        self.clocks.get(peer)
    }

    pub fn forget(&mut self, peer: &PeerId) -> Option<PeerClock> {
        self.clocks.remove(peer)
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Whether a session with `peer` could teach us anything: its clock is
    /// unknown, diverges from ours, or is strictly ahead of ours.
    pub fn should_reconcile(&self, mine: &PeerClock, peer: &PeerId) -> bool {
        match self.clocks.get(peer) {
            None => true,
            Some(theirs) => inconsistent(mine, theirs) || progressive(mine, theirs, true),
        }
    }
}
