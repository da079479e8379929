//! Session records: proposals, results, balances, lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::amount::AssetAmount;
use crate::asset::Asset;

/// Unique identifier for a trading session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(format!("sess_{}", Uuid::new_v4()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a swap proposal (unique within a session)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub String);

impl ProposalId {
    pub fn generate() -> Self {
        Self(format!("prop_{}", Uuid::new_v4()))
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle status
///
/// Transitions are strictly one-way: `Active → Closing → Settled`, with
/// `Error` as a sink for unrecoverable invariant violations. Absence of a
/// session is modelled as `Option::None` in the manager, not a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closing,
    Settled,
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Settled => "settled",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Whether the channel rail is live or the session degraded to memory-only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    Cosigned,
    MemoryOnly,
}

/// Per-asset balance inside a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBalance {
    /// Current amount
    pub amount: AssetAmount,
    /// Amount at session open
    pub initial_amount: AssetAmount,
    /// Derived: `amount - initial_amount`, in raw units
    pub pnl: i128,
}

impl SessionBalance {
    /// Opening balance: current mirrors initial, PnL is zero
    pub fn opening(amount: AssetAmount) -> Self {
        Self {
            amount,
            initial_amount: amount,
            pnl: 0,
        }
    }

    /// Re-derive PnL after `amount` changed
    pub fn refresh_pnl(&mut self) {
        self.pnl = self.amount.raw - self.initial_amount.raw;
    }
}

/// Balance sheet: deterministic iteration order by asset
pub type BalanceMap = BTreeMap<Asset, SessionBalance>;

/// A not-yet-accepted swap request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapProposal {
    pub id: ProposalId,
    pub token_in: Asset,
    pub token_out: Asset,
    pub amount_in: AssetAmount,
    pub estimated_amount_out: AssetAmount,
    pub max_slippage_bps: u32,
    pub dex: String,
    pub timestamp: DateTime<Utc>,
}

/// Where an accepted swap was executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    Offchain,
    Onchain,
}

/// Outcome of an accepted swap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResult {
    pub proposal_id: ProposalId,
    pub success: bool,
    pub amount_in: AssetAmount,
    pub amount_out: AssetAmount,
    /// Informational unit price (token_in per token_out); never used in
    /// invariant checks
    pub executed_price: f64,
    pub execution_type: ExecutionType,
    pub timestamp: DateTime<Utc>,
}

/// The full session record, owned by the session manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub balances: BalanceMap,
    pub history: Vec<SwapResult>,
    pub channel_mode: ChannelMode,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub settlement_tx_hash: Option<String>,
}

impl SessionState {
    pub fn balance(&self, asset: Asset) -> Option<&SessionBalance> {
        self.balances.get(&asset)
    }
}

/// Compact view of a session for tool and API consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub channel_mode: ChannelMode,
    pub swap_count: usize,
    pub balances: Vec<BalanceView>,
    pub opened_at: DateTime<Utc>,
}

/// Human-readable balance line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceView {
    pub asset: Asset,
    pub amount: String,
    pub initial_amount: String,
    pub pnl: String,
}

impl BalanceView {
    pub fn from_balance(balance: &SessionBalance) -> Self {
        let pnl = AssetAmount::new(balance.pnl, balance.amount.asset);
        Self {
            asset: balance.amount.asset,
            amount: balance.amount.to_display(),
            initial_amount: balance.initial_amount.to_display(),
            pnl: pnl.to_display(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_balance_has_zero_pnl() {
        let bal = SessionBalance::opening(AssetAmount::whole(1000, Asset::USDC));
        assert_eq!(bal.pnl, 0);
        assert_eq!(bal.amount, bal.initial_amount);
    }

    #[test]
    fn pnl_follows_amount() {
        let mut bal = SessionBalance::opening(AssetAmount::whole(1000, Asset::USDC));
        bal.amount = AssetAmount::whole(980, Asset::USDC);
        bal.refresh_pnl();
        assert_eq!(bal.pnl, -20 * Asset::USDC.unit());
    }

    #[test]
    fn balance_map_iterates_in_asset_order() {
        let mut map = BalanceMap::new();
        map.insert(
            Asset::ETH,
            SessionBalance::opening(AssetAmount::zero(Asset::ETH)),
        );
        map.insert(
            Asset::USDC,
            SessionBalance::opening(AssetAmount::zero(Asset::USDC)),
        );
        let order: Vec<Asset> = map.keys().copied().collect();
        assert_eq!(order, vec![Asset::USDC, Asset::ETH]);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
        assert_ne!(ProposalId::generate(), ProposalId::generate());
    }
}
