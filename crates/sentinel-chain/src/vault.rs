//! The vault: a minimal smart-contract wallet custodying session funds
//!
//! Execution is gated to the operator key or the account-abstraction entry
//! point; the agent's key never appears in any role. Every executed call
//! strictly increments the nonce. Settlement re-validates against the
//! guard and marks the replay bit in the same transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sentinel_channel::recover_signer;
use sentinel_types::{EvmAddress, SessionId};

use crate::guard::{GuardError, PolicyGuard};

#[derive(Error, Debug, Clone)]
pub enum VaultError {
    #[error("caller {caller} is neither owner nor entry point")]
    NotAuthorized { caller: String },

    #[error(transparent)]
    Guard(#[from] GuardError),
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// One call in an `execute` / `executeBatch`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub target: EvmAddress,
    pub value: i128,
    pub data: Vec<u8>,
}

/// Payload of the `Executed` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedCall {
    pub target: EvmAddress,
    pub value: i128,
    pub data: Vec<u8>,
    pub nonce: u64,
}

/// Payload of the `SessionSettled` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettledEvent {
    /// Keccak-256 of the UTF-8 session id
    pub session_id: String,
    /// The original human-readable session id, carried for indexing
    pub session_label: SessionId,
    pub operator: EvmAddress,
    /// USDC moved at settlement, smallest units
    pub usdc_delta: i128,
    /// ETH moved at settlement, wei
    pub eth_delta: i128,
    pub timestamp: DateTime<Utc>,
}

/// Contract state of the vault
#[derive(Debug, Clone)]
pub struct Vault {
    /// The vault's own contract address
    address: EvmAddress,
    owner: EvmAddress,
    entry_point: EvmAddress,
    nonce: u64,
    eth_balance: i128,
}

impl Vault {
    pub fn new(address: EvmAddress, owner: EvmAddress, entry_point: EvmAddress) -> Self {
        Self {
            address,
            owner,
            entry_point,
            nonce: 0,
            eth_balance: 0,
        }
    }

    pub fn address(&self) -> EvmAddress {
        self.address
    }

    pub fn owner(&self) -> EvmAddress {
        self.owner
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn eth_balance(&self) -> i128 {
        self.eth_balance
    }

    /// The `receive` hook
    pub fn receive(&mut self, value: i128) {
        self.eth_balance += value;
    }

    /// Execute a single call (owner or entry point)
    pub fn execute(&mut self, caller: EvmAddress, call: Call) -> Result<ExecutedCall> {
        self.require_authorized(caller)?;
        Ok(self.perform(call))
    }

    /// Execute a batch under one authorization check; the nonce still
    /// advances once per call
    pub fn execute_batch(
        &mut self,
        caller: EvmAddress,
        calls: Vec<Call>,
    ) -> Result<Vec<ExecutedCall>> {
        self.require_authorized(caller)?;
        Ok(calls.into_iter().map(|call| self.perform(call)).collect())
    }

    /// Signature-validation entry point used by the abstraction layer:
    /// recovers the signer from the personal-prefixed digest of the
    /// user-operation hash; succeeds iff the signer is the owner.
    pub fn validate_user_op(&self, user_op_hash: &[u8; 32], signature_hex: &str) -> bool {
        match recover_signer(user_op_hash, signature_hex) {
            Ok(address) => address == self.owner,
            Err(_) => false,
        }
    }

    /// Validate, mark and emit in one transaction
    pub fn settle_session(
        &mut self,
        caller: EvmAddress,
        guard: &mut PolicyGuard,
        session_label: SessionId,
        session_id: [u8; 32],
        token: EvmAddress,
        usdc_delta: i128,
        eth_delta: i128,
    ) -> Result<SessionSettledEvent> {
        self.require_authorized(caller)?;

        guard.validate_settlement(session_id, token, usdc_delta, eth_delta)?;
        guard.mark_settled(self.address, session_id)?;
        self.nonce += 1;

        Ok(SessionSettledEvent {
            session_id: format!("0x{}", hex::encode(session_id)),
            session_label,
            operator: self.owner,
            usdc_delta,
            eth_delta,
            timestamp: Utc::now(),
        })
    }

    fn perform(&mut self, call: Call) -> ExecutedCall {
        self.nonce += 1;
        if call.value > 0 {
            self.eth_balance -= call.value;
        }
        ExecutedCall {
            target: call.target,
            value: call.value,
            data: call.data,
            nonce: self.nonce,
        }
    }

    fn require_authorized(&self, caller: EvmAddress) -> Result<()> {
        if caller != self.owner && caller != self.entry_point {
            return Err(VaultError::NotAuthorized {
                caller: caller.to_hex(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::GuardPolicy;
    use sentinel_channel::{keccak256, ChannelSigner};
    use sentinel_types::Asset;
    use std::collections::BTreeSet;

    fn setup() -> (Vault, PolicyGuard, ChannelSigner) {
        let operator = ChannelSigner::from_label("vault owner").unwrap();
        let vault_address = EvmAddress([0x0b; 20]);
        let entry_point = EvmAddress([3u8; 20]);
        let vault = Vault::new(vault_address, operator.address(), entry_point);

        let mut guard = PolicyGuard::new(
            operator.address(),
            GuardPolicy {
                max_settlement_usdc: 10_000 * 1_000_000,
                max_settlement_eth: 10 * 10i128.pow(18),
                allowed_tokens: BTreeSet::from([
                    EvmAddress::parse(Asset::USDC.token_address()).unwrap()
                ]),
                policy_hash: "feedface".to_string(),
            },
        );
        guard.set_vault(operator.address(), vault_address).unwrap();
        (vault, guard, operator)
    }

    #[test]
    fn execute_is_gated_and_increments_nonce() {
        let (mut vault, _, operator) = setup();
        let stranger = EvmAddress([9u8; 20]);
        let call = Call {
            target: EvmAddress([4u8; 20]),
            value: 0,
            data: vec![0xde, 0xad],
        };

        assert!(matches!(
            vault.execute(stranger, call.clone()),
            Err(VaultError::NotAuthorized { .. })
        ));
        assert_eq!(vault.get_nonce(), 0);

        let executed = vault.execute(operator.address(), call).unwrap();
        assert_eq!(executed.nonce, 1);
        assert_eq!(vault.get_nonce(), 1);
    }

    #[test]
    fn batch_advances_nonce_per_call() {
        let (mut vault, _, operator) = setup();
        let calls = vec![
            Call { target: EvmAddress([4u8; 20]), value: 0, data: vec![] },
            Call { target: EvmAddress([5u8; 20]), value: 0, data: vec![] },
        ];
        let executed = vault.execute_batch(operator.address(), calls).unwrap();
        assert_eq!(executed[0].nonce, 1);
        assert_eq!(executed[1].nonce, 2);
        assert_eq!(vault.get_nonce(), 2);
    }

    #[test]
    fn user_op_validation_recovers_the_owner() {
        let (vault, _, operator) = setup();
        let user_op_hash = keccak256(b"user operation");
        let signature = operator.sign_hash(&user_op_hash).unwrap();

        assert!(vault.validate_user_op(&user_op_hash, &signature));

        let impostor = ChannelSigner::from_label("impostor").unwrap();
        let forged = impostor.sign_hash(&user_op_hash).unwrap();
        assert!(!vault.validate_user_op(&user_op_hash, &forged));

        assert!(!vault.validate_user_op(&user_op_hash, "not hex"));
    }

    #[test]
    fn settle_session_validates_marks_and_emits() {
        let (mut vault, mut guard, operator) = setup();
        let session_label = SessionId("sess_test".to_string());
        let session_id = keccak256(session_label.0.as_bytes());
        let token = EvmAddress::parse(Asset::USDC.token_address()).unwrap();

        let event = vault
            .settle_session(
                operator.address(),
                &mut guard,
                session_label.clone(),
                session_id,
                token,
                39_600_000,
                15_792_355_287_049_373,
            )
            .unwrap();

        assert_eq!(event.operator, operator.address());
        assert_eq!(event.usdc_delta, 39_600_000);
        assert!(guard.is_settled(session_id));
        assert_eq!(vault.get_nonce(), 1);

        // Replay produces an error, no second event, no nonce bump
        let replay = vault.settle_session(
            operator.address(),
            &mut guard,
            session_label,
            session_id,
            token,
            39_600_000,
            15_792_355_287_049_373,
        );
        assert!(matches!(
            replay,
            Err(VaultError::Guard(GuardError::AlreadySettled))
        ));
        assert_eq!(vault.get_nonce(), 1);
    }

    #[test]
    fn receive_hook_tracks_balance() {
        let (mut vault, _, _) = setup();
        vault.receive(5);
        vault.receive(7);
        assert_eq!(vault.eth_balance(), 12);
    }
}
