//! On-chain quoter adapter
//!
//! [`PoolQuoter`] wraps a read-only [`PoolBackend`] (an RPC client in
//! production, a deterministic stub in tests). The spot price used for the
//! impact calculation comes from a micro-quote of a small slice of the
//! trade, so impact stays a pure integer ratio without reading pool
//! internals.

use async_trait::async_trait;

use sentinel_types::{Asset, AssetAmount};

use crate::{impact_bps, Quote, QuoteError, QuoteOracle, Result};

/// Divisor for the micro-quote used to approximate the spot price
const MICRO_QUOTE_DIVISOR: i128 = 10_000;

/// Read-only access to an exact-input-single quoter
#[async_trait]
pub trait PoolBackend: Send + Sync {
    /// Quote `amount_in` raw units of `token_in` for `token_out`
    async fn quote_exact_input(
        &self,
        token_in: Asset,
        token_out: Asset,
        amount_in: i128,
    ) -> Result<i128>;

    /// Gas estimate for executing the swap on this venue
    fn swap_gas_estimate(&self) -> u64 {
        220_000
    }

    /// Route label reported with quotes from this backend
    fn route(&self) -> &str;
}

/// Quote oracle backed by an on-chain quoter
pub struct PoolQuoter<B: PoolBackend> {
    backend: B,
}

impl<B: PoolBackend> PoolQuoter<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: PoolBackend> QuoteOracle for PoolQuoter<B> {
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

        let out = self
            .backend
            .quote_exact_input(token_in, token_out, amount_in.raw)
            .await?;

        // Micro-quote: a slice small enough that its own impact is below
        // one basis point, scaled back up for the spot comparison.
        let micro_in = (amount_in.raw / MICRO_QUOTE_DIVISOR).max(1);
        let micro_out = self
            .backend
            .quote_exact_input(token_in, token_out, micro_in)
            .await?;
        let spot_out = micro_out * (amount_in.raw / micro_in);

        Ok(Quote {
            estimated_amount_out: AssetAmount::new(out, token_out),
            price_impact_bps: impact_bps(spot_out, out),
            route: self.backend.route().to_string(),
            estimated_gas: self.backend.swap_gas_estimate(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Constant-product stub standing in for the on-chain quoter
    struct StubPool {
        reserve_usdc: i128,
        reserve_eth: i128,
    }

    #[async_trait]
    impl PoolBackend for StubPool {
        async fn quote_exact_input(
            &self,
            token_in: Asset,
            _token_out: Asset,
            amount_in: i128,
        ) -> Result<i128> {
            let (rin, rout) = match token_in {
                Asset::USDC => (self.reserve_usdc, self.reserve_eth),
                Asset::ETH => (self.reserve_eth, self.reserve_usdc),
            };
            Ok(rout * amount_in / (rin + amount_in))
        }

        fn route(&self) -> &str {
            "pool-quoter"
        }
    }

    #[tokio::test]
    async fn quotes_through_backend_with_impact() {
        let quoter = PoolQuoter::new(StubPool {
            reserve_usdc: 2_500_000 * 1_000_000,
            reserve_eth: 1_000 * 10i128.pow(18),
        });
        let quote = quoter
            .quote(
                Asset::USDC,
                Asset::ETH,
                AssetAmount::whole(20, Asset::USDC),
            )
            .await
            .unwrap();
        assert_eq!(quote.route, "pool-quoter");
        assert!(quote.estimated_amount_out.raw > 0);
        // A 20 USDC trade against 2.5M of depth moves the price well under
        // one basis point; the micro-quote keeps that visible.
        assert!(quote.price_impact_bps <= 1);
    }

    #[tokio::test]
    async fn micro_quote_handles_tiny_amounts() {
        let quoter = PoolQuoter::new(StubPool {
            reserve_usdc: 2_500_000 * 1_000_000,
            reserve_eth: 1_000 * 10i128.pow(18),
        });
        let quote = quoter
            .quote(
                Asset::USDC,
                Asset::ETH,
                AssetAmount::new(5, Asset::USDC),
            )
            .await
            .unwrap();
        assert!(quote.estimated_amount_out.raw >= 0);
    }
}
