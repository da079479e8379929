//! Settlement records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::{Asset, EvmAddress};
use crate::session::SessionId;

/// A settled per-asset balance in on-chain integer units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledBalance {
    pub asset: Asset,
    /// Raw value in the asset's smallest on-chain unit
    pub raw: i128,
}

/// The durable record of a finalized session settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub session_id: SessionId,
    pub wallet_address: EvmAddress,
    pub balances: Vec<SettledBalance>,
    pub tx_hash: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}
