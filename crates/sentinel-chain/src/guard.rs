//! The on-chain policy guard
//!
//! Mirrors the off-chain policy for the final settlement check: per-session
//! caps, the token allow-set, and the replay map. `settled_sessions` is the
//! single source of truth for replay across every process that shares this
//! guard.
//!
//! `mark_settled` is callable only by the registered vault, so an
//! adversarial caller cannot burn a session id without settling it.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use sentinel_types::EvmAddress;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("caller {caller} is not the guard owner")]
    NotOwner { caller: String },

    #[error("caller {caller} is not the vault")]
    NotVault { caller: String },

    #[error("session already settled")]
    AlreadySettled,

    #[error("usdc amount {amount} exceeds settlement cap {cap}")]
    ExceedsUsdcCap { amount: i128, cap: i128 },

    #[error("eth amount {amount} exceeds settlement cap {cap}")]
    ExceedsEthCap { amount: i128, cap: i128 },

    #[error("token {token} is not allowed")]
    TokenNotAllowed { token: String },

    #[error("no vault registered")]
    NoVault,
}

pub type Result<T> = std::result::Result<T, GuardError>;

/// The guard's policy mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardPolicy {
    /// Max USDC moved per settlement, in smallest units
    pub max_settlement_usdc: i128,
    /// Max ETH moved per settlement, in wei
    pub max_settlement_eth: i128,
    /// Token addresses settlement may reference
    pub allowed_tokens: BTreeSet<EvmAddress>,
    /// Fingerprint of the off-chain policy this mirrors
    pub policy_hash: String,
}

/// Contract state of the policy guard
#[derive(Debug, Clone)]
pub struct PolicyGuard {
    owner: EvmAddress,
    vault: Option<EvmAddress>,
    policy: GuardPolicy,
    settled_sessions: HashMap<[u8; 32], bool>,
}

impl PolicyGuard {
    pub fn new(owner: EvmAddress, policy: GuardPolicy) -> Self {
        Self {
            owner,
            vault: None,
            policy,
            settled_sessions: HashMap::new(),
        }
    }

    /// Register the vault allowed to call `mark_settled` (owner only)
    pub fn set_vault(&mut self, caller: EvmAddress, vault: EvmAddress) -> Result<()> {
        self.require_owner(caller)?;
        self.vault = Some(vault);
        Ok(())
    }

    /// The read-only settlement check. Run by the settlement client before
    /// spending gas and again inside `settleSession`.
    pub fn validate_settlement(
        &self,
        session_id: [u8; 32],
        token: EvmAddress,
        usdc_amount: i128,
        eth_amount: i128,
    ) -> Result<()> {
        if self.is_settled(session_id) {
            return Err(GuardError::AlreadySettled);
        }
        if usdc_amount > self.policy.max_settlement_usdc {
            return Err(GuardError::ExceedsUsdcCap {
                amount: usdc_amount,
                cap: self.policy.max_settlement_usdc,
            });
        }
        if eth_amount > self.policy.max_settlement_eth {
            return Err(GuardError::ExceedsEthCap {
                amount: eth_amount,
                cap: self.policy.max_settlement_eth,
            });
        }
        if usdc_amount > 0 && !self.policy.allowed_tokens.contains(&token) {
            return Err(GuardError::TokenNotAllowed {
                token: token.to_hex(),
            });
        }
        Ok(())
    }

    /// Flip the replay bit. Vault only.
    pub fn mark_settled(&mut self, caller: EvmAddress, session_id: [u8; 32]) -> Result<()> {
        let vault = self.vault.ok_or(GuardError::NoVault)?;
        if caller != vault {
            return Err(GuardError::NotVault {
                caller: caller.to_hex(),
            });
        }
        if self.is_settled(session_id) {
            return Err(GuardError::AlreadySettled);
        }
        self.settled_sessions.insert(session_id, true);
        Ok(())
    }

    /// Swap in a new policy mirror (owner only). Returns `(old, new)`
    /// fingerprints for the `PolicyUpdated` event.
    pub fn update_policy(
        &mut self,
        caller: EvmAddress,
        new_policy: GuardPolicy,
    ) -> Result<(String, String)> {
        self.require_owner(caller)?;
        let old_hash = self.policy.policy_hash.clone();
        let new_hash = new_policy.policy_hash.clone();
        self.policy = new_policy;
        Ok((old_hash, new_hash))
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    pub fn policy_hash(&self) -> &str {
        &self.policy.policy_hash
    }

    pub fn is_token_allowed(&self, token: &EvmAddress) -> bool {
        self.policy.allowed_tokens.contains(token)
    }

    pub fn is_settled(&self, session_id: [u8; 32]) -> bool {
        self.settled_sessions.get(&session_id).copied().unwrap_or(false)
    }

    pub fn owner(&self) -> EvmAddress {
        self.owner
    }

    fn require_owner(&self, caller: EvmAddress) -> Result<()> {
        if caller != self.owner {
            return Err(GuardError::NotOwner {
                caller: caller.to_hex(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_types::Asset;

    fn usdc_token() -> EvmAddress {
        EvmAddress::parse(Asset::USDC.token_address()).unwrap()
    }

    fn guard() -> (PolicyGuard, EvmAddress, EvmAddress) {
        let owner = EvmAddress([1u8; 20]);
        let vault = EvmAddress([2u8; 20]);
        let mut guard = PolicyGuard::new(
            owner,
            GuardPolicy {
                max_settlement_usdc: 10_000 * 1_000_000,
                max_settlement_eth: 10 * 10i128.pow(18),
                allowed_tokens: BTreeSet::from([usdc_token()]),
                policy_hash: "feedface".to_string(),
            },
        );
        guard.set_vault(owner, vault).unwrap();
        (guard, owner, vault)
    }

    #[test]
    fn validates_within_caps() {
        let (guard, _, _) = guard();
        assert!(guard
            .validate_settlement([1u8; 32], usdc_token(), 39_600_000, 15_792_355_287_049_373)
            .is_ok());
    }

    #[test]
    fn rejects_over_cap() {
        let (guard, _, _) = guard();
        let too_much_usdc = guard
            .validate_settlement([1u8; 32], usdc_token(), 20_000 * 1_000_000, 0)
            .unwrap_err();
        assert!(matches!(too_much_usdc, GuardError::ExceedsUsdcCap { .. }));

        let too_much_eth = guard
            .validate_settlement([1u8; 32], usdc_token(), 0, 11 * 10i128.pow(18))
            .unwrap_err();
        assert!(matches!(too_much_eth, GuardError::ExceedsEthCap { .. }));
    }

    #[test]
    fn rejects_disallowed_token_when_usdc_moves() {
        let (guard, _, _) = guard();
        let unknown = EvmAddress([9u8; 20]);
        let result = guard.validate_settlement([1u8; 32], unknown, 1, 0);
        assert!(matches!(result, Err(GuardError::TokenNotAllowed { .. })));

        // A zero-usdc settlement against an unknown token passes the set
        // check (nothing of the token moves)
        assert!(guard.validate_settlement([1u8; 32], unknown, 0, 1).is_ok());
    }

    #[test]
    fn replay_is_rejected() {
        let (mut guard, _, vault) = guard();
        guard.mark_settled(vault, [7u8; 32]).unwrap();

        assert!(guard.is_settled([7u8; 32]));
        assert_eq!(
            guard.validate_settlement([7u8; 32], usdc_token(), 1, 0),
            Err(GuardError::AlreadySettled)
        );
        assert_eq!(
            guard.mark_settled(vault, [7u8; 32]),
            Err(GuardError::AlreadySettled)
        );
    }

    #[test]
    fn mark_settled_is_vault_only() {
        let (mut guard, owner, _) = guard();
        let result = guard.mark_settled(owner, [7u8; 32]);
        assert!(matches!(result, Err(GuardError::NotVault { .. })));
        assert!(!guard.is_settled([7u8; 32]));
    }

    #[test]
    fn update_policy_is_owner_only_and_reports_hash_transition() {
        let (mut guard, owner, _) = guard();
        let stranger = EvmAddress([8u8; 20]);

        let new_policy = GuardPolicy {
            max_settlement_usdc: 1,
            max_settlement_eth: 1,
            allowed_tokens: BTreeSet::from([usdc_token()]),
            policy_hash: "cafebabe".to_string(),
        };

        assert!(matches!(
            guard.update_policy(stranger, new_policy.clone()),
            Err(GuardError::NotOwner { .. })
        ));

        let (old, new) = guard.update_policy(owner, new_policy).unwrap();
        assert_eq!(old, "feedface");
        assert_eq!(new, "cafebabe");
        assert_eq!(guard.policy_hash(), "cafebabe");
    }
}
