//! The session manager
//!
//! Owns the session lifecycle state machine and drives the proposal
//! pipeline: quote, policy screen, balance mutation, channel update. The
//! balance map is owned exclusively here; the channel ledger owns the
//! co-signed states.
//!
//! # Concurrency
//!
//! One session per manager; proposals run strictly serially under the
//! pipeline write lock, so the policy check and the balance mutation
//! always observe one consistent snapshot. Simulations take the read side:
//! they run in parallel with each other but never interleave with a
//! proposal that is between its quote and its ledger commit.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use sentinel_channel::{ChannelError, ChannelLedger};
use sentinel_policy::{PolicyDecision, PolicyEngine, PolicyHash};
use sentinel_quote::{Quote, QuoteError, QuoteOracle};
use sentinel_types::{
    Asset, AssetAmount, BalanceMap, ChannelBalances, ChannelMode, ChannelSession, ExecutionType,
    ProposalId, SessionBalance, SessionId, SessionState, SessionStatus, SessionSummary,
    SwapProposal, SwapResult,
};

use crate::audit::{AuditEntry, AuditKind, AuditLog};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no active session")]
    NoActiveSession,

    #[error("a session is already {status}; close it first")]
    SessionAlreadyOpen { status: SessionStatus },

    #[error("session is {actual}, operation requires {required}")]
    WrongStatus {
        required: SessionStatus,
        actual: SessionStatus,
    },

    #[error("invalid deposit: {message}")]
    InvalidDeposit { message: String },

    #[error("invalid pair: {message}")]
    InvalidPair { message: String },

    #[error("insufficient balance: have {available} {asset}, need {required} {asset}")]
    InsufficientBalance {
        asset: Asset,
        available: String,
        required: String,
    },

    #[error("session action limit of {limit} reached")]
    ActionLimitReached { limit: u32 },

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error("channel update failed (retryable): {0}")]
    Channel(#[from] ChannelError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Tunables the configuration layer feeds in
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Deposit used when `open` is called without an explicit amount, and
    /// as the synthetic preview balance when no session is active
    pub default_deposit: AssetAmount,
    /// Maximum accepted swaps per session
    pub max_actions: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_deposit: AssetAmount::whole(1000, Asset::USDC),
            max_actions: 50,
        }
    }
}

/// What `propose_swap` hands back: an executed swap or a policy rejection.
/// Rejection is a normal outcome, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProposalOutcome {
    Executed {
        result: SwapResult,
        decision: PolicyDecision,
    },
    Rejected {
        decision: PolicyDecision,
    },
}

impl ProposalOutcome {
    pub fn decision(&self) -> &PolicyDecision {
        match self {
            Self::Executed { decision, .. } | Self::Rejected { decision } => decision,
        }
    }

    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed { .. })
    }
}

/// A dry-run of the pipeline: quote plus the decision the policy would make
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    pub quote: Quote,
    pub decision: PolicyDecision,
    pub would_approve: bool,
}

/// Session manager: one logical owner per session
pub struct SessionManager {
    policy: PolicyEngine,
    oracle: Arc<dyn QuoteOracle>,
    channel: Option<Arc<ChannelLedger>>,
    audit: AuditLog,
    settings: SessionSettings,
    session: RwLock<Option<SessionState>>,
    /// Write side serializes proposals; read side admits parallel simulations
    pipeline: RwLock<()>,
}

impl SessionManager {
    pub fn new(
        policy: PolicyEngine,
        oracle: Arc<dyn QuoteOracle>,
        channel: Option<Arc<ChannelLedger>>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            policy,
            oracle,
            channel,
            audit: AuditLog::new(),
            settings,
            session: RwLock::new(None),
            pipeline: RwLock::new(()),
        }
    }

    pub fn policy_hash(&self) -> &PolicyHash {
        self.policy.policy_hash()
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Open a session with an initial USDC allocation
    pub async fn open(&self, deposit: Option<AssetAmount>) -> Result<SessionState> {
        let _guard = self.pipeline.write().await;

        let deposit = deposit.unwrap_or(self.settings.default_deposit);
        if deposit.asset != Asset::USDC || deposit.raw <= 0 {
            return Err(SessionError::InvalidDeposit {
                message: format!("deposit must be a positive USDC amount, got {}", deposit),
            });
        }

        {
            let guard = self.session.read().await;
            if let Some(existing) = guard.as_ref() {
                if matches!(existing.status, SessionStatus::Active | SessionStatus::Closing) {
                    return Err(SessionError::SessionAlreadyOpen {
                        status: existing.status,
                    });
                }
            }
        }

        let session_id = SessionId::generate();
        let mut balances = BalanceMap::new();
        balances.insert(Asset::USDC, SessionBalance::opening(deposit));
        balances.insert(
            Asset::ETH,
            SessionBalance::opening(AssetAmount::zero(Asset::ETH)),
        );

        // Open the channel rail if one is configured; a transport failure
        // degrades to memory-only instead of blocking the session.
        let channel_mode = match &self.channel {
            Some(ledger) => match ledger.open(to_channel_balances(&balances)).await {
                Ok(chan) => {
                    info!(session = %session_id, channel = %chan.channel_id, "channel opened");
                    ChannelMode::Cosigned
                }
                Err(e) => {
                    warn!(session = %session_id, "channel open failed, running memory-only: {}", e);
                    self.audit
                        .record(
                            AuditKind::ChannelDegraded,
                            session_id.0.clone(),
                            serde_json::json!({ "error": e.to_string() }),
                        )
                        .await;
                    ChannelMode::MemoryOnly
                }
            },
            None => ChannelMode::MemoryOnly,
        };

        let session = SessionState {
            session_id: session_id.clone(),
            status: SessionStatus::Active,
            balances,
            history: Vec::new(),
            channel_mode,
            opened_at: Utc::now(),
            closed_at: None,
            settlement_tx_hash: None,
        };

        self.audit
            .record(
                AuditKind::SessionOpened,
                session_id.0.clone(),
                serde_json::json!({
                    "deposit": deposit.to_display(),
                    "channelMode": channel_mode,
                    "policyHash": self.policy.policy_hash().0,
                }),
            )
            .await;

        *self.session.write().await = Some(session.clone());
        info!(session = %session_id, deposit = %deposit, "session opened");
        Ok(session)
    }

    /// Dry-run: price the swap and report the decision the policy would
    /// make against current balances (or a synthetic allocation when no
    /// session is active)
    pub async fn simulate_swap(
        &self,
        token_in: Asset,
        token_out: Asset,
        amount_in: AssetAmount,
        max_slippage_bps: Option<u32>,
        dex: Option<&str>,
    ) -> Result<Simulation> {
        let _guard = self.pipeline.read().await;
        validate_pair(token_in, token_out, &amount_in)?;

        let quote = self.oracle.quote(token_in, token_out, amount_in).await?;
        let proposal = self.build_proposal(token_in, token_out, amount_in, &quote, max_slippage_bps, dex);

        let balances = match self.session.read().await.as_ref() {
            Some(session) => session.balances.clone(),
            None => {
                let mut synthetic = BalanceMap::new();
                synthetic.insert(
                    Asset::USDC,
                    SessionBalance::opening(self.settings.default_deposit),
                );
                synthetic.insert(
                    Asset::ETH,
                    SessionBalance::opening(AssetAmount::zero(Asset::ETH)),
                );
                synthetic
            }
        };

        let decision = self.policy.evaluate(&proposal, &balances);
        let would_approve = decision.approved;

        self.audit
            .record(
                AuditKind::SwapSimulated,
                proposal.id.0.clone(),
                serde_json::json!({
                    "pair": format!("{}->{}", token_in, token_out),
                    "amountIn": amount_in.to_display(),
                    "estimatedOut": quote.estimated_amount_out.to_display(),
                    "wouldApprove": would_approve,
                }),
            )
            .await;

        Ok(Simulation {
            quote,
            decision,
            would_approve,
        })
    }

    /// The canonical pipeline: quote, screen, apply, co-sign, record
    pub async fn propose_swap(
        &self,
        token_in: Asset,
        token_out: Asset,
        amount_in: AssetAmount,
        max_slippage_bps: Option<u32>,
        dex: Option<&str>,
    ) -> Result<ProposalOutcome> {
        let _guard = self.pipeline.write().await;
        validate_pair(token_in, token_out, &amount_in)?;

        // Snapshot the session under the pipeline lock; nothing else can
        // commit between here and our own commit below.
        let (session_id, balances, channel_mode) = {
            let guard = self.session.read().await;
            let session = guard.as_ref().ok_or(SessionError::NoActiveSession)?;
            if session.status != SessionStatus::Active {
                return Err(SessionError::WrongStatus {
                    required: SessionStatus::Active,
                    actual: session.status,
                });
            }
            if session.history.len() as u32 >= self.settings.max_actions {
                return Err(SessionError::ActionLimitReached {
                    limit: self.settings.max_actions,
                });
            }
            (
                session.session_id.clone(),
                session.balances.clone(),
                session.channel_mode,
            )
        };

        let quote = self.oracle.quote(token_in, token_out, amount_in).await?;
        let proposal =
            self.build_proposal(token_in, token_out, amount_in, &quote, max_slippage_bps, dex);

        let decision = self.policy.evaluate(&proposal, &balances);
        if !decision.approved {
            let failed: Vec<&str> = decision.failed_rules();
            info!(session = %session_id, proposal = %proposal.id, rules = ?failed, "swap rejected by policy");
            self.audit
                .record(
                    AuditKind::SwapRejected,
                    proposal.id.0.clone(),
                    serde_json::json!({
                        "pair": format!("{}->{}", token_in, token_out),
                        "amountIn": amount_in.to_display(),
                        "failedRules": failed,
                    }),
                )
                .await;
            return Ok(ProposalOutcome::Rejected { decision });
        }

        // Sufficiency is a runtime error, distinct from a policy rejection
        let balance_in = balances
            .get(&token_in)
            .copied()
            .unwrap_or_else(|| SessionBalance::opening(AssetAmount::zero(token_in)));
        if balance_in.amount.raw < amount_in.raw {
            let err = SessionError::InsufficientBalance {
                asset: token_in,
                available: balance_in.amount.to_display(),
                required: amount_in.to_display(),
            };
            self.audit
                .record(
                    AuditKind::SwapFailed,
                    proposal.id.0.clone(),
                    serde_json::json!({ "error": err.to_string() }),
                )
                .await;
            return Err(err);
        }

        // Apply the delta to a working copy; the session commits only after
        // the channel accepts the new sheet.
        let mut new_balances = balances.clone();
        apply_delta(&mut new_balances, &proposal)?;

        if channel_mode == ChannelMode::Cosigned {
            if let Some(ledger) = &self.channel {
                if let Err(e) = ledger.update(to_channel_balances(&new_balances)).await {
                    warn!(session = %session_id, proposal = %proposal.id, "channel update failed, rolling back: {}", e);
                    self.audit
                        .record(
                            AuditKind::SwapFailed,
                            proposal.id.0.clone(),
                            serde_json::json!({ "error": e.to_string(), "rolledBack": true }),
                        )
                        .await;
                    return Err(e.into());
                }
            }
        }

        let result = SwapResult {
            proposal_id: proposal.id.clone(),
            success: true,
            amount_in,
            amount_out: proposal.estimated_amount_out,
            executed_price: executed_price(&amount_in, &proposal.estimated_amount_out),
            execution_type: ExecutionType::Offchain,
            timestamp: Utc::now(),
        };

        {
            let mut guard = self.session.write().await;
            let session = guard.as_mut().ok_or(SessionError::NoActiveSession)?;
            session.balances = new_balances;
            session.history.push(result.clone());
        }

        self.audit
            .record(
                AuditKind::SwapExecuted,
                proposal.id.0.clone(),
                serde_json::json!({
                    "pair": format!("{}->{}", token_in, token_out),
                    "amountIn": amount_in.to_display(),
                    "amountOut": proposal.estimated_amount_out.to_display(),
                    "route": quote.route,
                }),
            )
            .await;
        info!(session = %session_id, proposal = %result.proposal_id, "swap executed");

        Ok(ProposalOutcome::Executed { result, decision })
    }

    /// Transition `active → closing` and finalize the channel. Retryable:
    /// a failed channel close leaves the session in `closing`.
    pub async fn close(&self) -> Result<SessionState> {
        let _guard = self.pipeline.write().await;

        let (session_id, channel_mode) = {
            let mut guard = self.session.write().await;
            let session = guard.as_mut().ok_or(SessionError::NoActiveSession)?;
            match session.status {
                SessionStatus::Active => {
                    session.status = SessionStatus::Closing;
                }
                // A prior close attempt failed mid-way; retry the channel
                // finalization below.
                SessionStatus::Closing => {}
                actual => {
                    return Err(SessionError::WrongStatus {
                        required: SessionStatus::Active,
                        actual,
                    })
                }
            }
            (session.session_id.clone(), session.channel_mode)
        };

        self.audit
            .record(
                AuditKind::SessionClosing,
                session_id.0.clone(),
                serde_json::json!({}),
            )
            .await;

        if channel_mode == ChannelMode::Cosigned {
            if let Some(ledger) = &self.channel {
                let still_running = ledger
                    .channel()
                    .await
                    .map(|c| c.status != sentinel_types::ChannelStatus::Finalized)
                    .unwrap_or(false);
                if still_running {
                    ledger.close().await?;
                }
            }
        }

        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(SessionError::NoActiveSession)?;
        info!(session = %session_id, "session closing, channel finalized");
        Ok(session.clone())
    }

    /// Only legal from `closing`; records the settlement transaction and
    /// reaches the terminal state
    pub async fn mark_settled(&self, tx_hash: impl Into<String>) -> Result<SessionState> {
        let tx_hash = tx_hash.into();
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(SessionError::NoActiveSession)?;
        if session.status != SessionStatus::Closing {
            return Err(SessionError::WrongStatus {
                required: SessionStatus::Closing,
                actual: session.status,
            });
        }

        session.status = SessionStatus::Settled;
        session.settlement_tx_hash = Some(tx_hash.clone());
        session.closed_at = Some(Utc::now());

        self.audit
            .record(
                AuditKind::SessionSettled,
                session.session_id.0.clone(),
                serde_json::json!({ "txHash": tx_hash }),
            )
            .await;
        info!(session = %session.session_id, tx = %tx_hash, "session settled");
        Ok(session.clone())
    }

    /// Sink for unrecoverable invariant violations
    pub async fn mark_error(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut guard = self.session.write().await;
        if let Some(session) = guard.as_mut() {
            session.status = SessionStatus::Error;
            self.audit
                .record(
                    AuditKind::SessionError,
                    session.session_id.0.clone(),
                    serde_json::json!({ "reason": reason }),
                )
                .await;
        }
    }

    pub async fn session(&self) -> Option<SessionState> {
        self.session.read().await.clone()
    }

    pub async fn balance(&self, asset: Asset) -> Option<SessionBalance> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.balances.get(&asset).copied())
    }

    pub async fn summary(&self) -> Option<SessionSummary> {
        self.session.read().await.as_ref().map(|session| {
            SessionSummary {
                session_id: session.session_id.clone(),
                status: session.status,
                channel_mode: session.channel_mode,
                swap_count: session.history.len(),
                balances: session
                    .balances
                    .values()
                    .map(sentinel_types::BalanceView::from_balance)
                    .collect(),
                opened_at: session.opened_at,
            }
        })
    }

    pub async fn channel_session(&self) -> Option<ChannelSession> {
        match &self.channel {
            Some(ledger) => ledger.channel().await,
            None => None,
        }
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.entries().await
    }

    pub async fn verify_audit_chain(&self) -> bool {
        self.audit.verify_chain().await
    }

    fn build_proposal(
        &self,
        token_in: Asset,
        token_out: Asset,
        amount_in: AssetAmount,
        quote: &Quote,
        max_slippage_bps: Option<u32>,
        dex: Option<&str>,
    ) -> SwapProposal {
        SwapProposal {
            id: ProposalId::generate(),
            token_in,
            token_out,
            amount_in,
            estimated_amount_out: quote.estimated_amount_out,
            max_slippage_bps: max_slippage_bps.unwrap_or(50),
            dex: dex.unwrap_or("default-venue").to_string(),
            timestamp: Utc::now(),
        }
    }
}

fn validate_pair(token_in: Asset, token_out: Asset, amount_in: &AssetAmount) -> Result<()> {
    if token_in == token_out {
        return Err(SessionError::InvalidPair {
            message: format!("cannot swap {} for itself", token_in),
        });
    }
    if amount_in.asset != token_in {
        return Err(SessionError::InvalidPair {
            message: format!(
                "amount is denominated in {}, tokenIn is {}",
                amount_in.asset, token_in
            ),
        });
    }
    if amount_in.raw <= 0 {
        return Err(SessionError::InvalidPair {
            message: format!("amount must be positive, got {}", amount_in.to_display()),
        });
    }
    Ok(())
}

/// `balanceIn -= amountIn; balanceOut += estimatedAmountOut`, PnL refreshed
fn apply_delta(balances: &mut BalanceMap, proposal: &SwapProposal) -> Result<()> {
    let balance_in = balances
        .get_mut(&proposal.token_in)
        .ok_or_else(|| SessionError::InvalidPair {
            message: format!("no balance entry for {}", proposal.token_in),
        })?;
    balance_in.amount = balance_in
        .amount
        .checked_sub(proposal.amount_in)
        .map_err(|_| SessionError::InsufficientBalance {
            asset: proposal.token_in,
            available: balance_in.amount.to_display(),
            required: proposal.amount_in.to_display(),
        })?;
    balance_in.refresh_pnl();

    let balance_out = balances
        .entry(proposal.token_out)
        .or_insert_with(|| SessionBalance::opening(AssetAmount::zero(proposal.token_out)));
    balance_out.amount = balance_out
        .amount
        .checked_add(proposal.estimated_amount_out)
        .map_err(|_| SessionError::InvalidPair {
            message: "balance overflow applying swap output".to_string(),
        })?;
    balance_out.refresh_pnl();
    Ok(())
}

/// Informational unit price (tokenIn per tokenOut); display only
fn executed_price(amount_in: &AssetAmount, amount_out: &AssetAmount) -> f64 {
    let human_in = amount_in.raw as f64 / amount_in.asset.unit() as f64;
    let human_out = amount_out.raw as f64 / amount_out.asset.unit() as f64;
    if human_out == 0.0 {
        0.0
    } else {
        human_in / human_out
    }
}

fn to_channel_balances(balances: &BalanceMap) -> ChannelBalances {
    balances
        .iter()
        .map(|(asset, balance)| (*asset, balance.amount.raw))
        .collect()
}
