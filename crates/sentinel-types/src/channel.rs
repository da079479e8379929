//! State-channel records
//!
//! A channel state is a numbered, co-signed snapshot of balances. The
//! ledger crate owns the signing and verification; these types only carry
//! the data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::asset::{Asset, EvmAddress};

/// Opaque channel identifier: `chan_` + 96-bit hex prefix, unique per session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4();
        Self(format!("chan_{}", hex::encode(&uuid.as_bytes()[..12])))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Prefund,
    Open,
    Running,
    Closing,
    Finalized,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Prefund => "prefund",
            Self::Open => "open",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Finalized => "finalized",
        };
        write!(f, "{}", s)
    }
}

/// Raw balances carried by a channel state, in smallest units
pub type ChannelBalances = BTreeMap<Asset, i128>;

/// A single numbered, co-signed balance snapshot
///
/// # Invariants
///
/// - `turn_num` increases by exactly 1 per accepted update
/// - `state_hash` is the Keccak-256 digest of the canonical encoding of
///   `(channel_id, turn_num, balances)`
/// - `signatures` holds exactly two recoverable signatures over the hash:
///   operator first, counterparty second
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel_id: ChannelId,
    pub turn_num: u64,
    pub balances: ChannelBalances,
    /// Hex-encoded 32-byte digest
    pub state_hash: String,
    /// Hex-encoded 65-byte recoverable signatures
    pub signatures: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChannelState {
    pub fn is_fully_signed(&self) -> bool {
        self.signatures.len() == 2
    }
}

/// The channel envelope: participants, current state, history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSession {
    pub channel_id: ChannelId,
    pub status: ChannelStatus,
    /// Operator first, counterparty second
    pub participants: [EvmAddress; 2],
    pub current_state: ChannelState,
    pub state_history: Vec<ChannelState>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_has_96_bit_prefix() {
        let id = ChannelId::generate();
        let hex_part = id.0.strip_prefix("chan_").unwrap();
        assert_eq!(hex_part.len(), 24);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn channel_ids_are_unique() {
        assert_ne!(ChannelId::generate(), ChannelId::generate());
    }
}
