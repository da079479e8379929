//! Sentinel Types - shared data model for the trading session kernel
//!
//! Everything that crosses a crate boundary lives here: the closed asset
//! enumeration, fixed-point amounts, session and channel records, and the
//! shared error type.
//!
//! # Invariants
//!
//! 1. Amounts are integers in the asset's smallest unit; no floating point
//!    participates in any invariant check
//! 2. Balance maps iterate in a deterministic (sorted) order
//! 3. Session and channel status transitions are one-way

pub mod amount;
pub mod asset;
pub mod channel;
pub mod error;
pub mod session;
pub mod settlement;

pub use amount::AssetAmount;
pub use asset::{Asset, EvmAddress};
pub use channel::{ChannelId, ChannelSession, ChannelState, ChannelStatus};
pub use error::{Result, SentinelError};
pub use channel::ChannelBalances;
pub use session::{
    BalanceMap, BalanceView, ChannelMode, ExecutionType, ProposalId, SessionBalance, SessionId,
    SessionState, SessionStatus, SessionSummary, SwapProposal, SwapResult,
};
pub use settlement::{SettledBalance, SettlementRecord};
