//! Deterministic local chain harness
//!
//! Hosts the guard and vault, assigns block numbers and transaction
//! hashes, and keeps the event log - the durable record the rest of the
//! kernel trusts. In production these contracts live on a real chain; the
//! harness preserves their exact semantics for tests and single-process
//! deployments.

use sha3::{Digest, Keccak256};
use tracing::info;

use sentinel_types::{EvmAddress, SessionId};

use crate::guard::{GuardError, GuardPolicy, PolicyGuard};
use crate::vault::{Call, ExecutedCall, SessionSettledEvent, Vault, VaultError};

/// A mined transaction
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
}

/// Everything the contracts emit
#[derive(Debug, Clone)]
pub enum ChainEvent {
    SessionSettled(SessionSettledEvent),
    Executed(ExecutedCall),
    PolicyUpdated {
        old_hash: String,
        new_hash: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// An event with its transaction context
#[derive(Debug, Clone)]
pub struct LoggedEvent {
    pub event: ChainEvent,
    pub tx_hash: String,
    pub block_number: u64,
}

/// One guard + one vault on a single-node chain
pub struct LocalChain {
    guard: PolicyGuard,
    vault: Vault,
    operator: EvmAddress,
    block_number: u64,
    events: Vec<LoggedEvent>,
}

impl LocalChain {
    /// Deploy both contracts. The vault address is derived from the
    /// operator so the deployment is deterministic.
    pub fn deploy(operator: EvmAddress, entry_point: EvmAddress, policy: GuardPolicy) -> Self {
        let vault_address = derive_contract_address(&operator, b"sentinel vault");
        let mut guard = PolicyGuard::new(operator, policy);
        guard
            .set_vault(operator, vault_address)
            .expect("deployer is the owner");
        let vault = Vault::new(vault_address, operator, entry_point);

        info!(vault = %vault_address, "local chain deployed");
        Self {
            guard,
            vault,
            operator,
            block_number: 0,
            events: Vec::new(),
        }
    }

    pub fn guard(&self) -> &PolicyGuard {
        &self.guard
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn events(&self) -> &[LoggedEvent] {
        &self.events
    }

    /// Read-only pre-validation call; mines nothing
    pub fn call_validate_settlement(
        &self,
        session_id: [u8; 32],
        token: EvmAddress,
        usdc_amount: i128,
        eth_amount: i128,
    ) -> Result<(), GuardError> {
        self.guard
            .validate_settlement(session_id, token, usdc_amount, eth_amount)
    }

    /// Mine a `settleSession` transaction from the operator
    pub fn submit_settle_session(
        &mut self,
        session_label: SessionId,
        session_id: [u8; 32],
        token: EvmAddress,
        usdc_delta: i128,
        eth_delta: i128,
    ) -> Result<TxReceipt, VaultError> {
        let event = self.vault.settle_session(
            self.operator,
            &mut self.guard,
            session_label,
            session_id,
            token,
            usdc_delta,
            eth_delta,
        )?;

        let receipt = self.mine(&session_id);
        self.events.push(LoggedEvent {
            event: ChainEvent::SessionSettled(event),
            tx_hash: receipt.tx_hash.clone(),
            block_number: receipt.block_number,
        });
        Ok(receipt)
    }

    /// Mine an `execute` transaction from the operator
    pub fn submit_execute(&mut self, call: Call) -> Result<TxReceipt, VaultError> {
        let executed = self.vault.execute(self.operator, call)?;
        let receipt = self.mine(&executed.nonce.to_be_bytes());
        self.events.push(LoggedEvent {
            event: ChainEvent::Executed(executed),
            tx_hash: receipt.tx_hash.clone(),
            block_number: receipt.block_number,
        });
        Ok(receipt)
    }

    /// Mine an `updatePolicy` transaction from the operator
    pub fn submit_update_policy(
        &mut self,
        new_policy: GuardPolicy,
    ) -> Result<TxReceipt, GuardError> {
        let (old_hash, new_hash) = self.guard.update_policy(self.operator, new_policy)?;
        let receipt = self.mine(new_hash.as_bytes());
        self.events.push(LoggedEvent {
            event: ChainEvent::PolicyUpdated {
                old_hash,
                new_hash,
                timestamp: chrono::Utc::now(),
            },
            tx_hash: receipt.tx_hash.clone(),
            block_number: receipt.block_number,
        });
        Ok(receipt)
    }

    /// Parse the `SessionSettled` event out of a mined transaction
    pub fn session_settled_event(&self, tx_hash: &str) -> Option<&SessionSettledEvent> {
        self.events.iter().find_map(|logged| {
            if logged.tx_hash != tx_hash {
                return None;
            }
            match &logged.event {
                ChainEvent::SessionSettled(event) => Some(event),
                _ => None,
            }
        })
    }

    fn mine(&mut self, salt: &[u8]) -> TxReceipt {
        self.block_number += 1;
        let mut hasher = Keccak256::new();
        hasher.update(self.block_number.to_be_bytes());
        hasher.update(salt);
        TxReceipt {
            tx_hash: format!("0x{}", hex::encode(hasher.finalize())),
            block_number: self.block_number,
        }
    }
}

fn derive_contract_address(deployer: &EvmAddress, salt: &[u8]) -> EvmAddress {
    let mut hasher = Keccak256::new();
    hasher.update(deployer.as_bytes());
    hasher.update(salt);
    let digest = hasher.finalize();
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[12..]);
    EvmAddress(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_types::Asset;
    use std::collections::BTreeSet;

    fn chain() -> LocalChain {
        LocalChain::deploy(
            EvmAddress([1u8; 20]),
            EvmAddress([3u8; 20]),
            GuardPolicy {
                max_settlement_usdc: 10_000 * 1_000_000,
                max_settlement_eth: 10 * 10i128.pow(18),
                allowed_tokens: BTreeSet::from([
                    EvmAddress::parse(Asset::USDC.token_address()).unwrap()
                ]),
                policy_hash: "feedface".to_string(),
            },
        )
    }

    #[test]
    fn settle_mines_a_block_and_logs_the_event() {
        let mut chain = chain();
        let token = EvmAddress::parse(Asset::USDC.token_address()).unwrap();
        let receipt = chain
            .submit_settle_session(
                SessionId("sess_a".to_string()),
                [1u8; 32],
                token,
                39_600_000,
                1,
            )
            .unwrap();

        assert_eq!(receipt.block_number, 1);
        let event = chain.session_settled_event(&receipt.tx_hash).unwrap();
        assert_eq!(event.usdc_delta, 39_600_000);
        assert!(chain.guard().is_settled([1u8; 32]));
    }

    #[test]
    fn replayed_settlement_mines_no_block_and_no_event() {
        let mut chain = chain();
        let token = EvmAddress::parse(Asset::USDC.token_address()).unwrap();
        chain
            .submit_settle_session(SessionId("sess_a".to_string()), [1u8; 32], token, 1, 1)
            .unwrap();
        let before_blocks = chain.block_number();
        let before_events = chain.events().len();

        let replay = chain.submit_settle_session(
            SessionId("sess_a".to_string()),
            [1u8; 32],
            token,
            1,
            1,
        );
        assert!(replay.is_err());
        assert_eq!(chain.block_number(), before_blocks);
        assert_eq!(chain.events().len(), before_events);
    }

    #[test]
    fn policy_update_logs_the_hash_transition() {
        let mut chain = chain();
        let receipt = chain
            .submit_update_policy(GuardPolicy {
                max_settlement_usdc: 1,
                max_settlement_eth: 1,
                allowed_tokens: BTreeSet::new(),
                policy_hash: "cafebabe".to_string(),
            })
            .unwrap();

        let logged = chain
            .events()
            .iter()
            .find(|e| e.tx_hash == receipt.tx_hash)
            .unwrap();
        match &logged.event {
            ChainEvent::PolicyUpdated { old_hash, new_hash, .. } => {
                assert_eq!(old_hash, "feedface");
                assert_eq!(new_hash, "cafebabe");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
