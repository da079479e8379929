//! Sentinel Chain - the on-chain half of the security contract
//!
//! The policy guard re-validates every settlement against a mirror of the
//! off-chain policy and enforces single settlement per session; the vault
//! custodies funds behind operator/entry-point gating and a strict nonce.
//! Both are expressed as contract-semantics state machines hosted by a
//! deterministic [`LocalChain`] harness that assigns blocks, transaction
//! hashes and the event log.
//!
//! The naming registry anchors the policy fingerprint to the agent's
//! human-readable identity (`com.sentinel.policyHash`).

mod chain;
mod guard;
mod naming;
mod vault;

pub use chain::{ChainEvent, LocalChain, LoggedEvent, TxReceipt};
pub use guard::{GuardError, GuardPolicy, PolicyGuard};
pub use naming::{AnchorStatus, NameRegistry, NamingError, POLICY_HASH_TEXT_KEY};
pub use vault::{Call, ExecutedCall, SessionSettledEvent, Vault, VaultError};
