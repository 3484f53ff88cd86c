//! Reconciliation message types.
//!
//! Two flows share one enum:
//!
//! - single-sketch: `Request` / `Response`, then an optional `Challenge`
//!   pushing ids the responder turned out to lack;
//! - partitioned: `BankRequest` / `BankResponse` per round, and a final
//!   `Fallback` carrying explicit ids for partitions that never decoded.

use serde::{Deserialize, Serialize};

use txrecon_core::{CompactClock, ItemId};
use txrecon_sketch::{BankDigest, CompactSketch};

use crate::error::{Result, SyncError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Message size limits.
pub mod limits {
    /// Max ids in any `txs` list.
    pub const MAX_TXS_PER_MESSAGE: usize = 1 << 16;
    /// Max ids an explicit fallback may carry per partition.
    pub const MAX_TXS_PER_SECTION: usize = 1 << 12;
    /// Max cells in a compact clock.
    pub const MAX_CLOCK_CELLS: usize = u16::MAX as usize;
    /// Max partitions in a bank digest: one per clock cell of the largest
    /// valid configuration.
    pub const MAX_BANK_PARTITIONS: usize = txrecon_core::MAX_CELLS;
    /// Max serialized bytes of a single sketch.
    pub const MAX_SKETCH_BYTES: usize = 1 << 20;
}

/// Reconciliation protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconMessage {
    /// Single-sketch reconciliation request.
    Request {
        clock: CompactClock,
        sketch: CompactSketch,
    },

    /// Reply to `Request`. `txs` are ids the requester lacks.
    Response {
        clock: CompactClock,
        sketch: CompactSketch,
        txs: Vec<ItemId>,
    },

    /// Ids the receiver lacks, found from the responder's sketch.
    Challenge { txs: Vec<ItemId> },

    /// One round of the partitioned protocol.
    BankRequest {
        round: u64,
        clock: CompactClock,
        bank: BankDigest,
    },

    /// Reply to `BankRequest`, built with the requester's capacities.
    /// On the final round `txs` holds the responder's items in the
    /// partitions that still failed.
    BankResponse {
        round: u64,
        clock: CompactClock,
        bank: BankDigest,
        txs: Vec<ItemId>,
    },

    /// The requester's items in the partitions that still failed.
    Fallback { round: u64, txs: Vec<ItemId> },

    /// Error condition.
    Error {
        /// Error code for programmatic handling.
        code: ErrorCode,
        /// Human-readable description.
        message: String,
    },
}

impl ReconMessage {
    /// Short name of the variant, for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            ReconMessage::Request { .. } => "Request",
            ReconMessage::Response { .. } => "Response",
            ReconMessage::Challenge { .. } => "Challenge",
            ReconMessage::BankRequest { .. } => "BankRequest",
            ReconMessage::BankResponse { .. } => "BankResponse",
            ReconMessage::Fallback { .. } => "Fallback",
            ReconMessage::Error { .. } => "Error",
        }
    }

    /// Encode as CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| SyncError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| SyncError::Encoding(e.to_string()))
    }

    /// Check if this message respects size limits.
    ///
    /// `max_sections` bounds how many partitions a fallback may cover.
    pub fn validate_limits(&self, max_sections: usize) -> std::result::Result<(), &'static str> {
        match self {
            ReconMessage::Request { clock, sketch } => {
                check_clock(clock)?;
                check_sketch(sketch)?;
            }
            ReconMessage::Response { clock, sketch, txs } => {
                check_clock(clock)?;
                check_sketch(sketch)?;
                check_txs(txs)?;
            }
            ReconMessage::Challenge { txs } => check_txs(txs)?,
            ReconMessage::BankRequest { clock, bank, .. } => {
                check_clock(clock)?;
                check_bank(bank)?;
            }
            ReconMessage::BankResponse {
                clock, bank, txs, ..
            } => {
                check_clock(clock)?;
                check_bank(bank)?;
                check_fallback(txs, max_sections)?;
            }
            ReconMessage::Fallback { txs, .. } => check_fallback(txs, max_sections)?,
            ReconMessage::Error { .. } => {}
        }
        Ok(())
    }
}

fn check_clock(clock: &CompactClock) -> std::result::Result<(), &'static str> {
    if clock.cells() > limits::MAX_CLOCK_CELLS {
        return Err("too many clock cells");
    }
    Ok(())
}

fn check_sketch(sketch: &CompactSketch) -> std::result::Result<(), &'static str> {
    if sketch.data.len() > limits::MAX_SKETCH_BYTES {
        return Err("sketch too large");
    }
    Ok(())
}

fn check_bank(bank: &BankDigest) -> std::result::Result<(), &'static str> {
    if bank.partitions() > limits::MAX_BANK_PARTITIONS {
        return Err("too many bank partitions");
    }
    if bank.checksums.len() != bank.partitions() {
        return Err("bank checksum count mismatch");
    }
    if bank.sketches.iter().any(|s| s.len() > limits::MAX_SKETCH_BYTES) {
        return Err("bank sketch too large");
    }
    Ok(())
}

fn check_txs(txs: &[ItemId]) -> std::result::Result<(), &'static str> {
    if txs.len() > limits::MAX_TXS_PER_MESSAGE {
        return Err("too many txs");
    }
    Ok(())
}

fn check_fallback(txs: &[ItemId], max_sections: usize) -> std::result::Result<(), &'static str> {
    check_txs(txs)?;
    if txs.len() > max_sections.saturating_mul(limits::MAX_TXS_PER_SECTION) {
        return Err("fallback exceeds max_sections");
    }
    Ok(())
}

/// Error codes for the reconciliation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown/unspecified error.
    Unknown = 0,
    /// Message too large.
    MessageTooLarge = 1,
    /// Invalid message format.
    InvalidMessage = 2,
    /// Message for a round the session is not in.
    RoundMismatch = 3,
    /// Sketch parameters do not match.
    ParameterMismatch = 4,
    /// Internal error on peer.
    InternalError = 5,
}

#[cfg(test)]
mod tests {
    use super::*;
    use txrecon_core::{PeerClock, SketchKind};
    use txrecon_sketch::CmsBank;

    fn clock() -> CompactClock {
        let mut clock = PeerClock::new(4, 0);
        clock.increment(ItemId(1));
        clock.compact().unwrap()
    }

    fn sketch() -> CompactSketch {
        CompactSketch {
            kind: SketchKind::Bloom,
            data: vec![0xA5; 100],
            seed: 3,
            checksum: 9,
        }
    }

    #[test]
    fn test_cbor_roundtrip() {
        let mut bank = CmsBank::new(4, 2, 11);
        bank.add(ItemId(5));
        let messages = vec![
            ReconMessage::Request {
                clock: clock(),
                sketch: sketch(),
            },
            ReconMessage::BankResponse {
                round: 2,
                clock: clock(),
                bank: bank.digest(),
                txs: vec![ItemId(1), ItemId(u64::MAX)],
            },
            ReconMessage::Error {
                code: ErrorCode::RoundMismatch,
                message: "expected round 1".into(),
            },
        ];
        for msg in messages {
            let bytes = msg.to_cbor().unwrap();
            assert_eq!(ReconMessage::from_cbor(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            ReconMessage::from_cbor(&[0xFF, 0x00, 0x13]),
            Err(SyncError::Encoding(_))
        ));
    }

    #[test]
    fn test_message_limits_valid() {
        let msg = ReconMessage::Response {
            clock: clock(),
            sketch: sketch(),
            txs: vec![ItemId(1); 10],
        };
        assert!(msg.validate_limits(16).is_ok());
    }

    #[test]
    fn test_message_limits_exceeded() {
        let msg = ReconMessage::Challenge {
            txs: vec![ItemId(1); limits::MAX_TXS_PER_MESSAGE + 1],
        };
        assert!(msg.validate_limits(16).is_err());

        let fallback = ReconMessage::Fallback {
            round: 2,
            txs: vec![ItemId(1); limits::MAX_TXS_PER_SECTION + 1],
        };
        assert!(fallback.validate_limits(1).is_err());
        assert!(fallback.validate_limits(2).is_ok());
    }

    #[test]
    fn test_largest_valid_config_fits_limits() {
        let n = txrecon_core::MAX_CELLS;
        let msg = ReconMessage::BankRequest {
            round: 0,
            clock: PeerClock::new(n, 0).compact().unwrap(),
            bank: CmsBank::new(n, 1, 0).digest(),
        };
        assert!(msg.validate_limits(16).is_ok());

        let over = ReconMessage::BankRequest {
            round: 0,
            clock: clock(),
            bank: CmsBank::new(n + 1, 1, 0).digest(),
        };
        assert!(over.validate_limits(16).is_err());
    }

    #[test]
    fn test_bank_shape_checked() {
        let mut digest = CmsBank::new(4, 2, 0).digest();
        digest.checksums.pop();
        let msg = ReconMessage::BankRequest {
            round: 0,
            clock: clock(),
            bank: digest,
        };
        assert_eq!(msg.validate_limits(16), Err("bank checksum count mismatch"));
    }
}
