//! Sentinel Settlement - pushing a finalized session on-chain
//!
//! The client encodes a closing session for the vault's `settleSession`
//! entry point: the session id becomes a 256-bit keccak digest, balances
//! become on-chain integer units. Before spending gas it pre-validates
//! against the guard with a read-only call; pre-validation failures are
//! terminal for the attempt and leave the session in `closing`.
//!
//! Transport failures are retried idempotently - the guard's replay map
//! makes a duplicate submission harmless.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use sentinel_chain::{GuardError, LocalChain, SessionSettledEvent, TxReceipt};
use sentinel_channel::keccak256;
use sentinel_types::{
    Asset, EvmAddress, SessionId, SessionState, SessionStatus, SettledBalance, SettlementRecord,
};

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("session is {actual}, settlement requires {required}")]
    WrongStatus {
        required: SessionStatus,
        actual: SessionStatus,
    },

    #[error("settlement pre-validation rejected: {0}")]
    PreValidationFailed(GuardError),

    #[error("settlement transaction rejected: {0}")]
    TransactionRejected(GuardError),

    #[error("settlement submission failed: {message}")]
    Submission { message: String },

    #[error("no SessionSettled event in transaction {tx_hash}")]
    EventMissing { tx_hash: String },
}

pub type Result<T> = std::result::Result<T, SettlementError>;

/// Encode a session identifier as its on-chain 256-bit form
pub fn encode_session_id(session_id: &SessionId) -> [u8; 32] {
    keccak256(session_id.0.as_bytes())
}

/// What the client needs from the chain: a read-only guard call, a
/// transaction submission, and a one-confirmation wait that yields the
/// parsed event
#[async_trait]
pub trait SettlementBackend: Send + Sync {
    async fn validate_settlement(
        &self,
        session_id: [u8; 32],
        token: EvmAddress,
        usdc_amount: i128,
        eth_amount: i128,
    ) -> Result<()>;

    async fn submit_settle_session(
        &self,
        session_label: SessionId,
        session_id: [u8; 32],
        token: EvmAddress,
        usdc_delta: i128,
        eth_delta: i128,
    ) -> Result<TxReceipt>;

    async fn wait_for_event(&self, receipt: &TxReceipt) -> Result<SessionSettledEvent>;

    fn wallet_address(&self) -> EvmAddress;
}

/// Backend over the deterministic local chain harness
pub struct LocalChainBackend {
    chain: Arc<RwLock<LocalChain>>,
    /// Fixed at deploy time
    vault_address: EvmAddress,
}

impl LocalChainBackend {
    pub async fn new(chain: Arc<RwLock<LocalChain>>) -> Self {
        let vault_address = chain.read().await.vault().address();
        Self {
            chain,
            vault_address,
        }
    }
}

#[async_trait]
impl SettlementBackend for LocalChainBackend {
    async fn validate_settlement(
        &self,
        session_id: [u8; 32],
        token: EvmAddress,
        usdc_amount: i128,
        eth_amount: i128,
    ) -> Result<()> {
        self.chain
            .read()
            .await
            .call_validate_settlement(session_id, token, usdc_amount, eth_amount)
            .map_err(SettlementError::PreValidationFailed)
    }

    async fn submit_settle_session(
        &self,
        session_label: SessionId,
        session_id: [u8; 32],
        token: EvmAddress,
        usdc_delta: i128,
        eth_delta: i128,
    ) -> Result<TxReceipt> {
        self.chain
            .write()
            .await
            .submit_settle_session(session_label, session_id, token, usdc_delta, eth_delta)
            .map_err(|e| match e {
                sentinel_chain::VaultError::Guard(guard) => {
                    SettlementError::TransactionRejected(guard)
                }
                other => SettlementError::Submission {
                    message: other.to_string(),
                },
            })
    }

    async fn wait_for_event(&self, receipt: &TxReceipt) -> Result<SessionSettledEvent> {
        // The local harness has instant finality; one confirmation is the
        // mined block itself.
        self.chain
            .read()
            .await
            .session_settled_event(&receipt.tx_hash)
            .cloned()
            .ok_or_else(|| SettlementError::EventMissing {
                tx_hash: receipt.tx_hash.clone(),
            })
    }

    fn wallet_address(&self) -> EvmAddress {
        // Funds are custodied by the vault
        self.vault_address
    }
}

/// The settlement client
pub struct SettlementClient {
    backend: Arc<dyn SettlementBackend>,
    /// Attempts for transport-layer failures; replay is safe
    max_submit_attempts: u32,
}

impl SettlementClient {
    pub fn new(backend: Arc<dyn SettlementBackend>) -> Self {
        Self {
            backend,
            max_submit_attempts: 2,
        }
    }

    /// Settle a closing session and return the durable record
    pub async fn settle(&self, session: &SessionState) -> Result<SettlementRecord> {
        if session.status != SessionStatus::Closing {
            return Err(SettlementError::WrongStatus {
                required: SessionStatus::Closing,
                actual: session.status,
            });
        }

        let session_id = encode_session_id(&session.session_id);
        let token = EvmAddress::parse(Asset::USDC.token_address())
            .expect("canonical token address parses");

        // Settlement moves the difference between the opening and final
        // sheets; the guard caps each leg.
        let usdc_delta = balance_delta(session, Asset::USDC);
        let eth_delta = balance_delta(session, Asset::ETH);

        self.backend
            .validate_settlement(session_id, token, usdc_delta, eth_delta)
            .await?;

        let receipt = self
            .submit_with_retry(&session.session_id, session_id, token, usdc_delta, eth_delta)
            .await?;
        let event = self.backend.wait_for_event(&receipt).await?;

        info!(
            session = %session.session_id,
            tx = %receipt.tx_hash,
            block = receipt.block_number,
            "session settled on-chain"
        );

        Ok(SettlementRecord {
            session_id: session.session_id.clone(),
            wallet_address: self.backend.wallet_address(),
            balances: session
                .balances
                .iter()
                .map(|(asset, balance)| SettledBalance {
                    asset: *asset,
                    raw: balance.amount.raw,
                })
                .collect(),
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            timestamp: event.timestamp,
        })
    }

    async fn submit_with_retry(
        &self,
        session_label: &SessionId,
        session_id: [u8; 32],
        token: EvmAddress,
        usdc_delta: i128,
        eth_delta: i128,
    ) -> Result<TxReceipt> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .backend
                .submit_settle_session(
                    session_label.clone(),
                    session_id,
                    token,
                    usdc_delta,
                    eth_delta,
                )
                .await
            {
                Ok(receipt) => return Ok(receipt),
                Err(SettlementError::Submission { message })
                    if attempt < self.max_submit_attempts =>
                {
                    warn!(session = %session_label, attempt, "submission failed, retrying: {}", message);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn balance_delta(session: &SessionState, asset: Asset) -> i128 {
    session
        .balances
        .get(&asset)
        .map(|b| (b.amount.raw - b.initial_amount.raw).abs())
        .unwrap_or(0)
}
