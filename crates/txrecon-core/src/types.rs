//! Strong type definitions for txrecon.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hashing::{seeded_hash, domain};

/// A 64-bit transaction identifier.
///
/// This is the compact form of a transaction that takes part in set
/// reconciliation. Two peers holding the same transaction derive the
/// same `ItemId` from it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl ItemId {
    /// Create an ItemId from its raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Derive the identifier of a full transaction.
    pub fn from_tx_bytes(tx: &[u8]) -> Self {
        Self(seeded_hash(domain::ITEM_ID, 0, tx))
    }

    /// Get the raw value.
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Big-endian byte encoding, as carried in id lists on the wire.
    pub const fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Parse from big-endian bytes.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.to_hex())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<u64> for ItemId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A 32-byte peer identity (typically the hash of the peer's public key).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Generate a random peer ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    /// The 64-bit hash of this identity used when deriving session seeds.
    pub fn seed_hash(&self) -> u64 {
        seeded_hash(domain::PEER, 0, &self.0)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An unordered pair of peers.
///
/// Stored as `(min, max)` so that both sides of a session build the same
/// key and the same seeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerPair {
    low: PeerId,
    high: PeerId,
}

impl PeerPair {
    /// Create the canonical pair for two peers.
    pub fn new(a: PeerId, b: PeerId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// The smaller peer ID.
    pub fn low(&self) -> &PeerId {
        &self.low
    }

    /// The larger peer ID.
    pub fn high(&self) -> &PeerId {
        &self.high
    }

    /// Base seed shared by both peers: `hash(a) ^ hash(b)`.
    pub fn base_seed(&self) -> u64 {
        self.low.seed_hash() ^ self.high.seed_hash()
    }

    /// Seed for a given reconciliation round: `hash(a) ^ hash(b) ^ round`.
    ///
    /// Each round re-partitions the item universe, so an unlucky
    /// partitioning does not persist across rounds.
    pub fn round_seed(&self, round: u64) -> u64 {
        self.base_seed() ^ round
    }

    /// The other member of the pair.
    pub fn other(&self, me: &PeerId) -> Option<PeerId> {
        if me == &self.low {
            Some(self.high)
        } else if me == &self.high {
            Some(self.low)
        } else {
            None
        }
    }
}
