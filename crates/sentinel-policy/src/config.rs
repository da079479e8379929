//! Policy configuration and canonical fingerprint

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use sentinel_types::Asset;

/// Errors raised while constructing a policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyConfigError {
    #[error("maxTradeBps must be in 1..=10000, got {value}")]
    InvalidTradeBps { value: u32 },

    #[error("maxSlippageBps must be in 1..=10000, got {value}")]
    InvalidSlippageBps { value: u32 },

    #[error("allowedDexes must not be empty")]
    EmptyDexSet,

    #[error("allowedAssets must not be empty")]
    EmptyAssetSet,
}

/// The 256-bit policy fingerprint, hex-encoded
///
/// Two policies share a hash iff they are operationally identical,
/// regardless of the order fields or set elements were supplied in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyHash(pub String);

impl fmt::Display for PolicyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable policy configuration
///
/// A session binds to exactly one policy; changing any field produces a new
/// hash and therefore a new session. Sets are stored sorted so the
/// canonical serialization falls out of iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Max fraction of the input-asset balance per swap, in basis points
    /// (200 = 2%)
    pub max_trade_bps: u32,
    /// Max tolerated slippage per swap, in basis points
    pub max_slippage_bps: u32,
    /// Venue identifiers admitted by rule 2 (exact, case-sensitive)
    pub allowed_dexes: BTreeSet<String>,
    /// Assets admitted on both sides of a swap
    pub allowed_assets: BTreeSet<Asset>,
}

impl PolicyConfig {
    pub fn new(
        max_trade_bps: u32,
        max_slippage_bps: u32,
        allowed_dexes: impl IntoIterator<Item = impl Into<String>>,
        allowed_assets: impl IntoIterator<Item = Asset>,
    ) -> Result<Self, PolicyConfigError> {
        if max_trade_bps == 0 || max_trade_bps > 10_000 {
            return Err(PolicyConfigError::InvalidTradeBps {
                value: max_trade_bps,
            });
        }
        if max_slippage_bps == 0 || max_slippage_bps > 10_000 {
            return Err(PolicyConfigError::InvalidSlippageBps {
                value: max_slippage_bps,
            });
        }

        let allowed_dexes: BTreeSet<String> =
            allowed_dexes.into_iter().map(Into::into).collect();
        if allowed_dexes.is_empty() {
            return Err(PolicyConfigError::EmptyDexSet);
        }

        let allowed_assets: BTreeSet<Asset> = allowed_assets.into_iter().collect();
        if allowed_assets.is_empty() {
            return Err(PolicyConfigError::EmptyAssetSet);
        }

        Ok(Self {
            max_trade_bps,
            max_slippage_bps,
            allowed_dexes,
            allowed_assets,
        })
    }

    /// Canonical serialization: keys lexicographically sorted, set elements
    /// sorted, integers in decimal, no whitespace.
    ///
    /// This exact byte sequence is what the fingerprint hashes; the
    /// on-chain guard computes it identically.
    pub fn canonical_json(&self) -> String {
        let mut assets: Vec<&str> = self
            .allowed_assets
            .iter()
            .map(|a| a.symbol())
            .collect();
        assets.sort_unstable();

        let dexes: Vec<String> = self
            .allowed_dexes
            .iter()
            .map(|d| format!("\"{}\"", escape_json(d)))
            .collect();

        format!(
            "{{\"allowedAssets\":[{}],\"allowedDexes\":[{}],\"maxSlippageBps\":{},\"maxTradeBps\":{}}}",
            assets
                .iter()
                .map(|a| format!("\"{}\"", a))
                .collect::<Vec<_>>()
                .join(","),
            dexes.join(","),
            self.max_slippage_bps,
            self.max_trade_bps,
        )
    }

    /// SHA-256 fingerprint of the canonical form, hex-encoded
    pub fn fingerprint(&self) -> PolicyHash {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        PolicyHash(hex::encode(hasher.finalize()))
    }
}

impl Default for PolicyConfig {
    /// The stock trading policy: 2% per-swap cap, 50 bps slippage,
    /// the default venue, both supported assets.
    fn default() -> Self {
        Self {
            max_trade_bps: 200,
            max_slippage_bps: 50,
            allowed_dexes: BTreeSet::from(["default-venue".to_string()]),
            allowed_assets: BTreeSet::from([Asset::USDC, Asset::ETH]),
        }
    }
}

fn escape_json(s: &str) -> String {
    s.chars()
        .flat_map(|c| match c {
            '"' => "\\\"".chars().collect::<Vec<_>>(),
            '\\' => "\\\\".chars().collect(),
            c => vec![c],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_fingerprint_vector() {
        let policy = PolicyConfig::default();
        assert_eq!(
            policy.canonical_json(),
            r#"{"allowedAssets":["ETH","USDC"],"allowedDexes":["default-venue"],"maxSlippageBps":50,"maxTradeBps":200}"#
        );
        assert_eq!(
            policy.fingerprint().0,
            "d2ae215a2d70dd4eb32b72137bfef0dbc191a3de1058d7f6931c70ec5bc7b38c"
        );
    }

    #[test]
    fn fingerprint_ignores_supply_order() {
        let a = PolicyConfig::new(
            200,
            50,
            ["uniswap-v3", "default-venue"],
            [Asset::ETH, Asset::USDC],
        )
        .unwrap();
        let b = PolicyConfig::new(
            200,
            50,
            ["default-venue", "uniswap-v3"],
            [Asset::USDC, Asset::ETH],
        )
        .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_operational_change() {
        let a = PolicyConfig::default();
        let mut b = a.clone();
        b.max_slippage_bps = 51;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_is_idempotent() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.fingerprint(), policy.fingerprint());
    }

    #[test]
    fn rejects_unbounded_fields() {
        assert!(matches!(
            PolicyConfig::new(0, 50, ["x"], [Asset::USDC]),
            Err(PolicyConfigError::InvalidTradeBps { .. })
        ));
        assert!(matches!(
            PolicyConfig::new(200, 10_001, ["x"], [Asset::USDC]),
            Err(PolicyConfigError::InvalidSlippageBps { .. })
        ));
        assert!(matches!(
            PolicyConfig::new(200, 50, Vec::<String>::new(), [Asset::USDC]),
            Err(PolicyConfigError::EmptyDexSet)
        ));
        assert!(matches!(
            PolicyConfig::new(200, 50, ["x"], std::iter::empty()),
            Err(PolicyConfigError::EmptyAssetSet)
        ));
    }
}
