//! Fixed-point asset amounts
//!
//! Amounts are `i128` raw values in the asset's smallest unit. Decimal
//! strings are the only human-readable representation; parsing and
//! formatting are pure integer string math so the same value always
//! produces the same text.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::asset::Asset;
use crate::error::{Result, SentinelError};

/// An amount of a specific asset, in smallest units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetAmount {
    /// Raw value in smallest units (e.g. wei for ETH, 10^-6 for USDC)
    pub raw: i128,
    /// The asset this amount denominates
    pub asset: Asset,
}

impl AssetAmount {
    pub fn new(raw: i128, asset: Asset) -> Self {
        Self { raw, asset }
    }

    pub fn zero(asset: Asset) -> Self {
        Self { raw: 0, asset }
    }

    /// Whole units of the asset (e.g. `AssetAmount::whole(1000, Asset::USDC)`)
    pub fn whole(units: i128, asset: Asset) -> Self {
        Self {
            raw: units * asset.unit(),
            asset,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    pub fn is_negative(&self) -> bool {
        self.raw < 0
    }

    fn require_same_asset(&self, other: &Self) -> Result<()> {
        if self.asset != other.asset {
            return Err(SentinelError::AssetMismatch {
                expected: self.asset.symbol().to_string(),
                actual: other.asset.symbol().to_string(),
            });
        }
        Ok(())
    }

    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.require_same_asset(&other)?;
        let raw = self
            .raw
            .checked_add(other.raw)
            .ok_or(SentinelError::AmountOverflow)?;
        Ok(Self { raw, ..self })
    }

    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.require_same_asset(&other)?;
        let raw = self
            .raw
            .checked_sub(other.raw)
            .ok_or(SentinelError::AmountUnderflow)?;
        Ok(Self { raw, ..self })
    }

    /// Multiply by basis points (floor division, pure integer)
    pub fn mul_bps(self, bps: u32) -> Result<Self> {
        let raw = self
            .raw
            .checked_mul(bps as i128)
            .ok_or(SentinelError::AmountOverflow)?
            / 10_000;
        Ok(Self { raw, ..self })
    }

    /// Parse an exact decimal string (e.g. `"19.6"`) into smallest units.
    ///
    /// Rejects more fractional digits than the asset carries; never goes
    /// through floating point.
    pub fn parse(asset: Asset, text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty() && frac.is_empty() {
            return Err(SentinelError::InvalidAmount {
                message: format!("empty amount '{}'", text),
            });
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(SentinelError::InvalidAmount {
                message: format!("non-digit in amount '{}'", text),
            });
        }

        let decimals = asset.decimals() as usize;
        if frac.len() > decimals {
            return Err(SentinelError::InvalidAmount {
                message: format!(
                    "'{}' has more than {} fractional digits for {}",
                    text, decimals, asset
                ),
            });
        }

        let whole_part: i128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| SentinelError::InvalidAmount {
                message: format!("amount '{}' out of range", text),
            })?
        };

        let mut frac_padded = frac.to_string();
        while frac_padded.len() < decimals {
            frac_padded.push('0');
        }
        let frac_part: i128 = if frac_padded.is_empty() {
            0
        } else {
            frac_padded.parse().map_err(|_| SentinelError::InvalidAmount {
                message: format!("amount '{}' out of range", text),
            })?
        };

        let raw = whole_part
            .checked_mul(asset.unit())
            .and_then(|w| w.checked_add(frac_part))
            .ok_or(SentinelError::AmountOverflow)?;

        Ok(Self {
            raw: if negative { -raw } else { raw },
            asset,
        })
    }

    /// Render as an exact decimal string with the asset's full precision,
    /// trailing zeros trimmed (but at least one digit after the point is
    /// dropped entirely for whole values).
    pub fn to_display(&self) -> String {
        let unit = self.asset.unit();
        let negative = self.raw < 0;
        let abs = self.raw.unsigned_abs();
        let unit = unit as u128;
        let whole = abs / unit;
        let frac = abs % unit;

        let mut out = String::new();
        if negative {
            out.push('-');
        }
        out.push_str(&whole.to_string());
        if frac != 0 {
            let mut frac_str = format!("{:0>width$}", frac, width = self.asset.decimals() as usize);
            while frac_str.ends_with('0') {
                frac_str.pop();
            }
            out.push('.');
            out.push_str(&frac_str);
        }
        out
    }
}

impl fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_display(), self.asset)
    }
}

impl PartialOrd for AssetAmount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.asset != other.asset {
            return None;
        }
        self.raw.partial_cmp(&other.raw)
    }
}
