//! Local constant-product AMM
//!
//! A price reference with fixed reserves, not a venue with depth
//! accounting: quotes do not mutate the reserves. The output follows
//! `out = reserveOut * inAfterFee / (reserveIn + inAfterFee)` with the fee
//! taken from the input side, all in integer smallest units.

use async_trait::async_trait;
use std::collections::BTreeMap;

use sentinel_types::{Asset, AssetAmount};

use crate::{impact_bps, Quote, QuoteError, QuoteOracle, Result};

/// Fee in basis points (0.30%)
pub const AMM_FEE_BPS: i128 = 30;

/// Flat gas estimate reported for local quotes
const LOCAL_SWAP_GAS: u64 = 150_000;

/// Constant-product curve over a fixed set of pairs
pub struct LocalAmm {
    /// `(token_in, token_out)` -> `(reserve_in, reserve_out)` in raw units
    reserves: BTreeMap<(Asset, Asset), (i128, i128)>,
}

impl LocalAmm {
    pub fn new() -> Self {
        Self {
            reserves: BTreeMap::new(),
        }
    }

    /// The reference pool: 2 500 000 USDC against 1 000 ETH
    pub fn with_reference_reserves() -> Self {
        let mut amm = Self::new();
        amm.add_pair(
            AssetAmount::whole(2_500_000, Asset::USDC),
            AssetAmount::whole(1_000, Asset::ETH),
        );
        amm
    }

    /// Register a pair in both directions
    pub fn add_pair(&mut self, reserve_a: AssetAmount, reserve_b: AssetAmount) {
        self.reserves.insert(
            (reserve_a.asset, reserve_b.asset),
            (reserve_a.raw, reserve_b.raw),
        );
        self.reserves.insert(
            (reserve_b.asset, reserve_a.asset),
            (reserve_b.raw, reserve_a.raw),
        );
    }
}

impl Default for LocalAmm {
    fn default() -> Self {
        Self::with_reference_reserves()
    }
}

#[async_trait]
impl QuoteOracle for LocalAmm {
    async fn quote(
        &self,
        token_in: Asset,
        token_out: Asset,
        amount_in: AssetAmount,
    ) -> Result<Quote> {
        if amount_in.raw <= 0 {
            return Err(QuoteError::NonPositiveAmount {
                amount: amount_in.to_display(),
            });
        }

        let (reserve_in, reserve_out) = self
            .reserves
            .get(&(token_in, token_out))
            .copied()
            .ok_or(QuoteError::NoLiquidity {
                token_in,
                token_out,
            })?;

        let in_after_fee = amount_in.raw * (10_000 - AMM_FEE_BPS) / 10_000;
        let out = reserve_out * in_after_fee / (reserve_in + in_after_fee);

        // Spot output at mid price, before fee and impact
        let spot_out = amount_in.raw * reserve_out / reserve_in;

        Ok(Quote {
            estimated_amount_out: AssetAmount::new(out, token_out),
            price_impact_bps: impact_bps(spot_out, out),
            route: "local-amm".to_string(),
            estimated_gas: LOCAL_SWAP_GAS,
        })
    }
}
