//! The channel ledger
//!
//! Holds the authoritative single-session channel, produces monotonically
//! numbered co-signed states, and provides the final state for settlement.
//!
//! # Invariants
//!
//! 1. `turn_num` of the current state equals `state_history.len() - 1`
//! 2. Every accepted state carries exactly two signatures that recover to
//!    the participant addresses
//! 3. Status only moves forward: `prefund → open → running → closing →
//!    finalized`; after `finalized` no mutation is permitted
//! 4. A rejected update leaves the prior turn authoritative

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use sentinel_types::{ChannelBalances, ChannelId, ChannelSession, ChannelState, ChannelStatus};

use crate::adapter::{CosignError, CosignerAdapter};
use crate::encode::state_hash;
use crate::signing::{recover_signer, ChannelSigner, SigningError};

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("no channel is open")]
    NoChannel,

    #[error("channel is {actual}, operation requires {required}")]
    WrongStatus {
        required: ChannelStatus,
        actual: ChannelStatus,
    },

    #[error("signature {index} recovered {recovered}, expected participant {expected}")]
    SignatureMismatch {
        index: usize,
        recovered: String,
        expected: String,
    },

    #[error("counterparty did not answer within {timeout_ms} ms")]
    CosignTimeout { timeout_ms: u64 },

    #[error(transparent)]
    Cosign(#[from] CosignError),

    #[error(transparent)]
    Signing(#[from] SigningError),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Default bound on a counterparty round-trip
const DEFAULT_COSIGN_TIMEOUT: Duration = Duration::from_secs(5);

/// The co-signed balance-sheet ledger for one session at a time
pub struct ChannelLedger {
    signer: ChannelSigner,
    cosigner: Arc<dyn CosignerAdapter>,
    cosign_timeout: Duration,
    session: RwLock<Option<ChannelSession>>,
}

impl ChannelLedger {
    pub fn new(signer: ChannelSigner, cosigner: Arc<dyn CosignerAdapter>) -> Self {
        Self {
            signer,
            cosigner,
            cosign_timeout: DEFAULT_COSIGN_TIMEOUT,
            session: RwLock::new(None),
        }
    }

    pub fn with_cosign_timeout(mut self, timeout: Duration) -> Self {
        self.cosign_timeout = timeout;
        self
    }

    /// The operator's channel address
    pub fn operator_address(&self) -> sentinel_types::EvmAddress {
        self.signer.address()
    }

    /// Open a channel at turn 0 over the initial balances.
    ///
    /// The channel sits at `prefund` while the counterparty signature is
    /// being collected, moves to `open` once both signatures are held,
    /// and to `running` once both verified against the participants.
    /// A failure at any leg restores whatever channel existed before.
    pub async fn open(&self, initial_balances: ChannelBalances) -> Result<ChannelSession> {
        let previous = {
            let guard = self.session.read().await;
            if let Some(existing) = guard.as_ref() {
                if existing.status != ChannelStatus::Finalized {
                    return Err(ChannelError::WrongStatus {
                        required: ChannelStatus::Finalized,
                        actual: existing.status,
                    });
                }
            }
            guard.clone()
        };

        let channel_id = ChannelId::generate();
        let hash = state_hash(&channel_id, 0, &initial_balances);
        let operator_sig = self.signer.sign_hash(&hash)?;
        let mut genesis = ChannelState {
            channel_id: channel_id.clone(),
            turn_num: 0,
            balances: initial_balances,
            state_hash: hex::encode(hash),
            signatures: vec![operator_sig],
            timestamp: Utc::now(),
        };

        // Prefund: the operator's side of the genesis state is committed,
        // the counterparty's signature is still outstanding.
        *self.session.write().await = Some(ChannelSession {
            channel_id: channel_id.clone(),
            status: ChannelStatus::Prefund,
            participants: [self.signer.address(), self.cosigner.address()],
            current_state: genesis.clone(),
            state_history: Vec::new(),
            opened_at: Utc::now(),
            closed_at: None,
        });
        debug!(%channel_id, "channel prefund");

        let counter_sig = match tokio::time::timeout(
            self.cosign_timeout,
            self.cosigner.countersign(&genesis),
        )
        .await
        {
            Ok(Ok(sig)) => sig,
            Ok(Err(e)) => {
                *self.session.write().await = previous;
                return Err(e.into());
            }
            Err(_) => {
                *self.session.write().await = previous;
                return Err(ChannelError::CosignTimeout {
                    timeout_ms: self.cosign_timeout.as_millis() as u64,
                });
            }
        };
        genesis.signatures.push(counter_sig);

        // Open: both sides hold the genesis state.
        {
            let mut guard = self.session.write().await;
            if let Some(session) = guard.as_mut() {
                session.status = ChannelStatus::Open;
                session.current_state = genesis.clone();
            }
        }
        debug!(%channel_id, "channel open, genesis co-signed");

        if let Err(e) = self.verify_signatures(&hash, &genesis) {
            *self.session.write().await = previous;
            return Err(e);
        }

        // Running: both signatures recovered to the participants.
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(ChannelError::NoChannel)?;
        session.status = ChannelStatus::Running;
        session.state_history.push(genesis);
        info!(%channel_id, "channel running");
        Ok(session.clone())
    }

    /// Produce the next co-signed state over `new_balances`
    pub async fn update(&self, new_balances: ChannelBalances) -> Result<ChannelState> {
        let (channel_id, next_turn) = {
            let guard = self.session.read().await;
            let session = guard.as_ref().ok_or(ChannelError::NoChannel)?;
            if session.status != ChannelStatus::Running {
                return Err(ChannelError::WrongStatus {
                    required: ChannelStatus::Running,
                    actual: session.status,
                });
            }
            (session.channel_id.clone(), session.current_state.turn_num + 1)
        };

        let state = self.co_sign(&channel_id, next_turn, new_balances).await?;

        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(ChannelError::NoChannel)?;
        session.current_state = state.clone();
        session.state_history.push(state.clone());
        debug!(%channel_id, turn = next_turn, "channel state advanced");
        Ok(state)
    }

    /// Close the channel with a final co-signed turn
    pub async fn close(&self) -> Result<ChannelSession> {
        let (channel_id, final_turn, balances) = {
            let mut guard = self.session.write().await;
            let session = guard.as_mut().ok_or(ChannelError::NoChannel)?;
            if session.status != ChannelStatus::Running {
                return Err(ChannelError::WrongStatus {
                    required: ChannelStatus::Running,
                    actual: session.status,
                });
            }
            session.status = ChannelStatus::Closing;
            (
                session.channel_id.clone(),
                session.current_state.turn_num + 1,
                session.current_state.balances.clone(),
            )
        };

        let final_state = match self.co_sign(&channel_id, final_turn, balances).await {
            Ok(state) => state,
            Err(e) => {
                // The close intent stands; the last fully-signed state
                // remains authoritative and close may be retried.
                let mut guard = self.session.write().await;
                if let Some(session) = guard.as_mut() {
                    session.status = ChannelStatus::Running;
                }
                return Err(e);
            }
        };

        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(ChannelError::NoChannel)?;
        session.current_state = final_state.clone();
        session.state_history.push(final_state);
        session.status = ChannelStatus::Finalized;
        session.closed_at = Some(Utc::now());
        info!(%channel_id, turn = final_turn, "channel finalized");
        Ok(session.clone())
    }

    /// Hex digest of the latest fully-signed state
    pub async fn latest_hash(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.current_state.state_hash.clone())
    }

    pub async fn channel(&self) -> Option<ChannelSession> {
        self.session.read().await.clone()
    }

    /// Build, sign, countersign and verify one state
    async fn co_sign(
        &self,
        channel_id: &ChannelId,
        turn_num: u64,
        balances: ChannelBalances,
    ) -> Result<ChannelState> {
        let hash = state_hash(channel_id, turn_num, &balances);
        let operator_sig = self.signer.sign_hash(&hash)?;

        let mut state = ChannelState {
            channel_id: channel_id.clone(),
            turn_num,
            balances,
            state_hash: hex::encode(hash),
            signatures: vec![operator_sig],
            timestamp: Utc::now(),
        };

        let counter_sig =
            match tokio::time::timeout(self.cosign_timeout, self.cosigner.countersign(&state))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ChannelError::CosignTimeout {
                        timeout_ms: self.cosign_timeout.as_millis() as u64,
                    })
                }
            };
        state.signatures.push(counter_sig);

        self.verify_signatures(&hash, &state)?;
        Ok(state)
    }

    /// Both signatures must recover to the expected participants before a
    /// state is accepted
    fn verify_signatures(&self, hash: &[u8; 32], state: &ChannelState) -> Result<()> {
        let expected = [self.signer.address(), self.cosigner.address()];
        for (index, (sig, participant)) in
            state.signatures.iter().zip(expected.iter()).enumerate()
        {
            let recovered = recover_signer(hash, sig)?;
            if recovered != *participant {
                return Err(ChannelError::SignatureMismatch {
                    index,
                    recovered: recovered.to_hex(),
                    expected: participant.to_hex(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::LocalCosigner;
    use async_trait::async_trait;
    use sentinel_types::Asset;

    fn ledger() -> ChannelLedger {
        ChannelLedger::new(
            ChannelSigner::from_label("test operator").unwrap(),
            Arc::new(LocalCosigner::broker().unwrap()),
        )
    }

    fn balances(usdc_raw: i128, eth_raw: i128) -> ChannelBalances {
        let mut map = ChannelBalances::new();
        map.insert(Asset::USDC, usdc_raw);
        map.insert(Asset::ETH, eth_raw);
        map
    }

    #[tokio::test]
    async fn open_produces_cosigned_genesis() {
        let ledger = ledger();
        let session = ledger.open(balances(1_000_000_000, 0)).await.unwrap();

        assert_eq!(session.status, ChannelStatus::Running);
        assert_eq!(session.current_state.turn_num, 0);
        assert_eq!(session.state_history.len(), 1);
        assert!(session.current_state.is_fully_signed());
    }

    #[tokio::test]
    async fn turn_numbers_track_history_positions() {
        let ledger = ledger();
        ledger.open(balances(1_000_000_000, 0)).await.unwrap();
        ledger
            .update(balances(980_000_000, 7_975_936_383_931_401))
            .await
            .unwrap();
        ledger
            .update(balances(960_400_000, 15_792_355_287_049_373))
            .await
            .unwrap();
        let session = ledger.close().await.unwrap();

        // open + 2 updates + final
        assert_eq!(session.state_history.len(), 4);
        for (position, state) in session.state_history.iter().enumerate() {
            assert_eq!(state.turn_num, position as u64);
            assert!(state.is_fully_signed());
        }
        assert_eq!(
            session.current_state.turn_num,
            session.state_history.len() as u64 - 1
        );
    }

    #[tokio::test]
    async fn update_requires_running() {
        let ledger = ledger();
        let result = ledger.update(balances(1, 0)).await;
        assert!(matches!(result, Err(ChannelError::NoChannel)));
    }

    #[tokio::test]
    async fn no_mutation_after_finalized() {
        let ledger = ledger();
        ledger.open(balances(1_000_000_000, 0)).await.unwrap();
        ledger.close().await.unwrap();

        let update = ledger.update(balances(1, 0)).await;
        assert!(matches!(
            update,
            Err(ChannelError::WrongStatus {
                actual: ChannelStatus::Finalized,
                ..
            })
        ));

        let close = ledger.close().await;
        assert!(matches!(close, Err(ChannelError::WrongStatus { .. })));
    }

    #[tokio::test]
    async fn reopen_after_finalized_starts_a_fresh_channel() {
        let ledger = ledger();
        let first = ledger.open(balances(1_000_000_000, 0)).await.unwrap();
        ledger.close().await.unwrap();

        let second = ledger.open(balances(500_000_000, 0)).await.unwrap();
        assert_ne!(first.channel_id, second.channel_id);
        assert_eq!(second.current_state.turn_num, 0);
    }

    #[tokio::test]
    async fn double_open_is_a_state_error() {
        let ledger = ledger();
        ledger.open(balances(1_000_000_000, 0)).await.unwrap();
        let result = ledger.open(balances(1, 0)).await;
        assert!(matches!(result, Err(ChannelError::WrongStatus { .. })));
    }

    /// A counterparty that signs with a key the ledger does not expect
    struct ImpostorCosigner {
        claimed: ChannelSigner,
        actual: ChannelSigner,
    }

    #[async_trait]
    impl CosignerAdapter for ImpostorCosigner {
        fn address(&self) -> sentinel_types::EvmAddress {
            self.claimed.address()
        }

        async fn countersign(&self, state: &ChannelState) -> std::result::Result<String, CosignError> {
            let hash = state_hash(&state.channel_id, state.turn_num, &state.balances);
            Ok(self.actual.sign_hash(&hash)?)
        }
    }

    #[tokio::test]
    async fn mismatched_cosignature_rejects_state_and_keeps_prior_turn() {
        let operator = ChannelSigner::from_label("test operator").unwrap();
        let honest = Arc::new(LocalCosigner::broker().unwrap());
        let ledger = ChannelLedger::new(operator, honest);
        ledger.open(balances(1_000_000_000, 0)).await.unwrap();

        let impostor = ImpostorCosigner {
            claimed: ChannelSigner::from_label("sentinel broker cosigner").unwrap(),
            actual: ChannelSigner::from_label("impostor").unwrap(),
        };
        let bad_ledger = ChannelLedger::new(
            ChannelSigner::from_label("test operator").unwrap(),
            Arc::new(impostor),
        );
        bad_ledger.open(balances(1, 0)).await.map(|_| ()).unwrap_err();

        // The failed open left no half-open channel behind
        assert!(bad_ledger.channel().await.is_none());

        // The honest ledger is untouched by any of this
        let session = ledger.channel().await.unwrap();
        assert_eq!(session.current_state.turn_num, 0);
        assert_eq!(session.state_history.len(), 1);
    }

    /// Counterparty that records what the ledger shows while it decides
    /// whether to countersign
    struct ObservingCosigner {
        inner: LocalCosigner,
        ledger: Arc<std::sync::OnceLock<Arc<ChannelLedger>>>,
        seen: Arc<std::sync::Mutex<Vec<(ChannelStatus, usize)>>>,
    }

    #[async_trait]
    impl CosignerAdapter for ObservingCosigner {
        fn address(&self) -> sentinel_types::EvmAddress {
            self.inner.address()
        }

        async fn countersign(&self, state: &ChannelState) -> std::result::Result<String, CosignError> {
            if let Some(ledger) = self.ledger.get() {
                if let Some(session) = ledger.channel().await {
                    self.seen
                        .lock()
                        .unwrap()
                        .push((session.status, state.signatures.len()));
                }
            }
            self.inner.countersign(state).await
        }
    }

    #[tokio::test]
    async fn open_sits_at_prefund_while_the_cosignature_is_collected() {
        let ledger_slot = Arc::new(std::sync::OnceLock::new());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let ledger = Arc::new(ChannelLedger::new(
            ChannelSigner::from_label("test operator").unwrap(),
            Arc::new(ObservingCosigner {
                inner: LocalCosigner::broker().unwrap(),
                ledger: ledger_slot.clone(),
                seen: seen.clone(),
            }),
        ));
        ledger_slot.set(ledger.clone()).ok();

        let session = ledger.open(balances(1_000_000_000, 0)).await.unwrap();
        assert_eq!(session.status, ChannelStatus::Running);

        // While the genesis countersignature was being collected, the
        // stored channel was prefund and held only the operator signature
        let observed = seen.lock().unwrap().clone();
        assert_eq!(observed, vec![(ChannelStatus::Prefund, 1)]);

        // Updates countersign against a running channel
        ledger.update(balances(980_000_000, 1)).await.unwrap();
        let observed = seen.lock().unwrap().clone();
        assert_eq!(observed[1].0, ChannelStatus::Running);
    }

    #[tokio::test]
    async fn failed_open_restores_the_prior_finalized_channel() {
        struct FailsWhenTold {
            inner: LocalCosigner,
            fail: std::sync::atomic::AtomicBool,
        }

        #[async_trait]
        impl CosignerAdapter for FailsWhenTold {
            fn address(&self) -> sentinel_types::EvmAddress {
                self.inner.address()
            }

            async fn countersign(
                &self,
                state: &ChannelState,
            ) -> std::result::Result<String, CosignError> {
                if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                    return Err(CosignError::Transport {
                        message: "link down".to_string(),
                    });
                }
                self.inner.countersign(state).await
            }
        }

        let cosigner = Arc::new(FailsWhenTold {
            inner: LocalCosigner::broker().unwrap(),
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let ledger = ChannelLedger::new(
            ChannelSigner::from_label("test operator").unwrap(),
            cosigner.clone(),
        );

        let first = ledger.open(balances(1_000_000_000, 0)).await.unwrap();
        ledger.close().await.unwrap();

        cosigner.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(ledger.open(balances(1, 0)).await.is_err());

        // The finalized channel is back in place, not a half-open one
        let session = ledger.channel().await.unwrap();
        assert_eq!(session.channel_id, first.channel_id);
        assert_eq!(session.status, ChannelStatus::Finalized);
    }

    #[tokio::test]
    async fn failed_update_leaves_last_signed_state_authoritative() {
        struct FlakyCosigner {
            inner: LocalCosigner,
            fail_from_turn: u64,
        }

        #[async_trait]
        impl CosignerAdapter for FlakyCosigner {
            fn address(&self) -> sentinel_types::EvmAddress {
                self.inner.address()
            }

            async fn countersign(
                &self,
                state: &ChannelState,
            ) -> std::result::Result<String, CosignError> {
                if state.turn_num >= self.fail_from_turn {
                    return Err(CosignError::Transport {
                        message: "connection reset".to_string(),
                    });
                }
                self.inner.countersign(state).await
            }
        }

        let ledger = ChannelLedger::new(
            ChannelSigner::from_label("test operator").unwrap(),
            Arc::new(FlakyCosigner {
                inner: LocalCosigner::broker().unwrap(),
                fail_from_turn: 1,
            }),
        );
        ledger.open(balances(1_000_000_000, 0)).await.unwrap();
        let before = ledger.latest_hash().await.unwrap();

        let result = ledger.update(balances(980_000_000, 1)).await;
        assert!(result.is_err());

        let session = ledger.channel().await.unwrap();
        assert_eq!(session.current_state.turn_num, 0);
        assert_eq!(ledger.latest_hash().await.unwrap(), before);
        assert_eq!(session.status, ChannelStatus::Running);
    }
}
