//! Counterparty co-signer adapters
//!
//! The ledger never hard-codes the counterparty: it hands an
//! operator-signed state to a [`CosignerAdapter`] and gets the
//! counterparty signature back. Production wires a message-bus transport
//! here; tests and single-process deployments use the deterministic
//! [`LocalCosigner`].

use async_trait::async_trait;
use thiserror::Error;

use sentinel_types::{ChannelState, EvmAddress};

use crate::encode::state_hash;
use crate::signing::{ChannelSigner, SigningError};

#[derive(Error, Debug, Clone)]
pub enum CosignError {
    #[error("counterparty refused state: {reason}")]
    Refused { reason: String },

    #[error("cosigner transport failed: {message}")]
    Transport { message: String },

    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// Produces the counterparty signature for an outbound signed state
#[async_trait]
pub trait CosignerAdapter: Send + Sync {
    /// The counterparty's channel address
    fn address(&self) -> EvmAddress;

    /// Countersign a state the operator has already signed. Returns the
    /// hex `r || s || v` signature over the state hash.
    async fn countersign(&self, state: &ChannelState) -> Result<String, CosignError>;
}

/// Deterministic in-process co-signer
///
/// Re-derives the canonical hash from the state fields and refuses to sign
/// anything that does not match: a broker would do the same before
/// committing its key to a state. Signing is RFC 6979 deterministic, so
/// re-delivery of the same `(channelId, turnNum)` yields the same bytes.
pub struct LocalCosigner {
    signer: ChannelSigner,
}

impl LocalCosigner {
    pub fn new(signer: ChannelSigner) -> Self {
        Self { signer }
    }

    /// Stable demo broker identity
    pub fn broker() -> Result<Self, SigningError> {
        Ok(Self::new(ChannelSigner::from_label("sentinel broker cosigner")?))
    }
}

#[async_trait]
impl CosignerAdapter for LocalCosigner {
    fn address(&self) -> EvmAddress {
        self.signer.address()
    }

    async fn countersign(&self, state: &ChannelState) -> Result<String, CosignError> {
        let expected = state_hash(&state.channel_id, state.turn_num, &state.balances);
        if hex::encode(expected) != state.state_hash {
            return Err(CosignError::Refused {
                reason: format!(
                    "state hash mismatch at turn {}: claimed {}, derived {}",
                    state.turn_num,
                    state.state_hash,
                    hex::encode(expected)
                ),
            });
        }
        Ok(self.signer.sign_hash(&expected)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::recover_signer;
    use chrono::Utc;
    use sentinel_types::{Asset, ChannelBalances, ChannelId};

    fn signed_state(channel_id: &ChannelId, turn_num: u64) -> ChannelState {
        let mut balances = ChannelBalances::new();
        balances.insert(Asset::USDC, 1_000_000_000);
        let hash = state_hash(channel_id, turn_num, &balances);
        ChannelState {
            channel_id: channel_id.clone(),
            turn_num,
            balances,
            state_hash: hex::encode(hash),
            signatures: vec![],
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn countersigns_a_valid_state() {
        let cosigner = LocalCosigner::broker().unwrap();
        let id = ChannelId::generate();
        let state = signed_state(&id, 0);

        let sig = cosigner.countersign(&state).await.unwrap();
        let hash = state_hash(&id, 0, &state.balances);
        assert_eq!(recover_signer(&hash, &sig).unwrap(), cosigner.address());
    }

    #[tokio::test]
    async fn refuses_a_tampered_hash() {
        let cosigner = LocalCosigner::broker().unwrap();
        let id = ChannelId::generate();
        let mut state = signed_state(&id, 0);
        state.balances.insert(Asset::USDC, 2_000_000_000);

        let result = cosigner.countersign(&state).await;
        assert!(matches!(result, Err(CosignError::Refused { .. })));
    }

    #[tokio::test]
    async fn countersignature_is_deterministic() {
        let cosigner = LocalCosigner::broker().unwrap();
        let id = ChannelId::generate();
        let state = signed_state(&id, 3);

        let first = cosigner.countersign(&state).await.unwrap();
        let second = cosigner.countersign(&state).await.unwrap();
        assert_eq!(first, second);
    }
}
