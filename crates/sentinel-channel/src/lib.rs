//! Sentinel Channel - the co-signed state-channel ledger
//!
//! The ledger holds the authoritative off-chain balance sheet for one
//! session. Every state transition produces a monotonically numbered
//! snapshot whose canonical encoding is Keccak-hashed and signed by both
//! participants under the Ethereum personal-message prefix, so the final
//! state verifies on-chain without any custom scheme.
//!
//! The counterparty is always behind a [`CosignerAdapter`]: a message-bus
//! transport in production, the deterministic [`LocalCosigner`] in tests
//! and single-process deployments.

mod adapter;
mod encode;
mod ledger;
mod signing;

pub use adapter::{CosignError, CosignerAdapter, LocalCosigner};
pub use encode::{canonical_state, state_hash};
pub use ledger::{ChannelError, ChannelLedger};
pub use signing::{
    address_of, keccak256, personal_digest, recover_signer, ChannelSigner, SigningError,
};
