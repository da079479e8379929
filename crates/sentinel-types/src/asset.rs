//! Asset and address types
//!
//! The asset universe is a closed enumeration. Each asset carries its
//! display decimal count and a canonical on-chain token address (the
//! runtime address book in the configuration may override the latter).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SentinelError};

/// Supported assets
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Asset {
    /// USD Coin (6 decimals)
    USDC,
    /// Ether, routed as wrapped ether on-chain (18 decimals)
    ETH,
}

impl Asset {
    /// Number of decimal places in the asset's smallest unit
    pub fn decimals(&self) -> u8 {
        match self {
            Self::USDC => 6,
            Self::ETH => 18,
        }
    }

    /// Asset symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::USDC => "USDC",
            Self::ETH => "ETH",
        }
    }

    /// Canonical mainnet token address
    pub fn token_address(&self) -> &'static str {
        match self {
            Self::USDC => "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            Self::ETH => "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
        }
    }

    /// Multiplier for the asset's smallest unit (10^decimals)
    pub fn unit(&self) -> i128 {
        10i128.pow(self.decimals() as u32)
    }

    /// Parse an asset symbol (exact, case-sensitive)
    pub fn from_symbol(symbol: &str) -> Result<Self> {
        match symbol {
            "USDC" => Ok(Self::USDC),
            "ETH" => Ok(Self::ETH),
            other => Err(SentinelError::UnknownAsset {
                symbol: other.to_string(),
            }),
        }
    }

    /// All supported assets, in canonical order
    pub fn all() -> [Asset; 2] {
        [Self::USDC, Self::ETH]
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A 20-byte Ethereum address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvmAddress(pub [u8; 20]);

impl EvmAddress {
    /// The zero address
    pub fn zero() -> Self {
        Self([0u8; 20])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parse a `0x`-prefixed hex address
    pub fn parse(s: &str) -> Result<Self> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|e| SentinelError::InvalidAddress {
            message: e.to_string(),
        })?;
        if bytes.len() != 20 {
            return Err(SentinelError::InvalidAddress {
                message: format!("expected 20 bytes, got {}", bytes.len()),
            });
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }

    /// Hex-encode with `0x` prefix
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for EvmAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_decimals() {
        assert_eq!(Asset::USDC.decimals(), 6);
        assert_eq!(Asset::ETH.decimals(), 18);
    }

    #[test]
    fn symbol_roundtrip() {
        for asset in Asset::all() {
            assert_eq!(Asset::from_symbol(asset.symbol()).unwrap(), asset);
        }
    }

    #[test]
    fn symbol_is_case_sensitive() {
        assert!(Asset::from_symbol("usdc").is_err());
        assert!(Asset::from_symbol("Eth").is_err());
    }

    #[test]
    fn address_parse_and_display() {
        let addr = EvmAddress::parse(Asset::USDC.token_address()).unwrap();
        assert_eq!(addr.to_hex(), Asset::USDC.token_address());
        assert_eq!(addr.to_hex().len(), 42);
    }

    #[test]
    fn address_rejects_wrong_length() {
        assert!(EvmAddress::parse("0x1234").is_err());
        assert!(EvmAddress::parse("not an address").is_err());
    }
}
