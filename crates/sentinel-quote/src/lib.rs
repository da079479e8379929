//! Sentinel Quote - pricing for swap proposals
//!
//! A [`QuoteOracle`] answers "what would this swap return right now".
//! Two backends exist, tried in priority order by [`FallbackOracle`]:
//!
//! 1. [`PoolQuoter`] - a read-only adapter over an on-chain exact-input
//!    quoter
//! 2. [`LocalAmm`] - a constant-product reference curve with a 30 bps fee
//!
//! An unknown pair is a proposal error (`NoLiquidity`), not a session
//! error; callers surface it to the agent and move on.

mod amm;
mod onchain;

pub use amm::LocalAmm;
pub use onchain::{PoolBackend, PoolQuoter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use sentinel_types::{Asset, AssetAmount};

/// Errors from the quote pipeline
#[derive(Error, Debug, Clone)]
pub enum QuoteError {
    #[error("no liquidity for pair {token_in}/{token_out}")]
    NoLiquidity { token_in: Asset, token_out: Asset },

    #[error("amount must be positive, got {amount}")]
    NonPositiveAmount { amount: String },

    #[error("quote backend unavailable: {message}")]
    BackendUnavailable { message: String },

    #[error("all quote backends failed: {last_error}")]
    AllBackendsFailed { last_error: String },
}

pub type Result<T> = std::result::Result<T, QuoteError>;

/// A priced swap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub estimated_amount_out: AssetAmount,
    /// Deviation from the spot output, in basis points
    pub price_impact_bps: u32,
    /// Venue/route label for display and audit
    pub route: String,
    pub estimated_gas: u64,
}

/// Anything that can price an exact-input swap
#[async_trait]
pub trait QuoteOracle: Send + Sync {
    async fn quote(
        &self,
        token_in: Asset,
        token_out: Asset,
        amount_in: AssetAmount,
    ) -> Result<Quote>;
}

/// Tries each backend in order, falling over on any error
pub struct FallbackOracle {
    backends: Vec<Box<dyn QuoteOracle>>,
}

impl FallbackOracle {
    pub fn new(backends: Vec<Box<dyn QuoteOracle>>) -> Self {
        Self { backends }
    }

    /// The standard stack: local AMM only (no RPC configured)
    pub fn local_only() -> Self {
        Self::new(vec![Box::new(LocalAmm::with_reference_reserves())])
    }

    /// The full stack: on-chain quoter first, local AMM as the fallback
    pub fn with_pool<B: PoolBackend + 'static>(backend: B) -> Self {
        Self::new(vec![
            Box::new(PoolQuoter::new(backend)),
            Box::new(LocalAmm::with_reference_reserves()),
        ])
    }
}

#[async_trait]
impl QuoteOracle for FallbackOracle {
    async fn quote(
        &self,
        token_in: Asset,
        token_out: Asset,
        amount_in: AssetAmount,
    ) -> Result<Quote> {
        let mut last_error: Option<QuoteError> = None;
        for backend in &self.backends {
            match backend.quote(token_in, token_out, amount_in).await {
                Ok(quote) => return Ok(quote),
                Err(e) => {
                    warn!("quote backend failed, falling over: {}", e);
                    last_error = Some(e);
                }
            }
        }
        // Every backend has been tried. A pair no backend carries is a
        // proposal error; anything else is a backend outage.
        match last_error {
            Some(e @ QuoteError::NoLiquidity { .. }) => Err(e),
            Some(e) => Err(QuoteError::AllBackendsFailed {
                last_error: e.to_string(),
            }),
            None => Err(QuoteError::AllBackendsFailed {
                last_error: "no backends configured".to_string(),
            }),
        }
    }
}

/// Price impact against the spot output, in basis points (integer floor)
pub(crate) fn impact_bps(spot_out: i128, actual_out: i128) -> u32 {
    if spot_out <= 0 {
        return 0;
    }
    let diff = (spot_out - actual_out).unsigned_abs();
    (diff * 10_000 / spot_out.unsigned_abs()) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingBackend;

    #[async_trait]
    impl QuoteOracle for FailingBackend {
        async fn quote(&self, _: Asset, _: Asset, _: AssetAmount) -> Result<Quote> {
            Err(QuoteError::BackendUnavailable {
                message: "rpc timeout".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn falls_over_to_next_backend() {
        let oracle = FallbackOracle::new(vec![
            Box::new(FailingBackend),
            Box::new(LocalAmm::with_reference_reserves()),
        ]);
        let quote = oracle
            .quote(
                Asset::USDC,
                Asset::ETH,
                AssetAmount::whole(20, Asset::USDC),
            )
            .await
            .unwrap();
        assert_eq!(quote.route, "local-amm");
    }

    #[tokio::test]
    async fn surfaces_failure_when_all_backends_fail() {
        let oracle = FallbackOracle::new(vec![Box::new(FailingBackend)]);
        let result = oracle
            .quote(
                Asset::USDC,
                Asset::ETH,
                AssetAmount::whole(20, Asset::USDC),
            )
            .await;
        assert!(matches!(result, Err(QuoteError::AllBackendsFailed { .. })));
    }

    #[tokio::test]
    async fn no_liquidity_on_the_primary_still_reaches_the_fallback() {
        // A primary that carries no pairs at all, chained before the
        // reference AMM which does carry USDC/ETH
        let oracle = FallbackOracle::new(vec![
            Box::new(LocalAmm::new()),
            Box::new(LocalAmm::with_reference_reserves()),
        ]);
        let quote = oracle
            .quote(
                Asset::USDC,
                Asset::ETH,
                AssetAmount::whole(20, Asset::USDC),
            )
            .await
            .unwrap();
        assert_eq!(quote.route, "local-amm");
        assert_eq!(quote.estimated_amount_out.raw, 7_975_936_383_931_401);
    }

    #[tokio::test]
    async fn no_liquidity_surfaces_only_after_every_backend_was_tried() {
        let oracle = FallbackOracle::new(vec![
            Box::new(FailingBackend),
            Box::new(LocalAmm::new()),
        ]);
        let result = oracle
            .quote(
                Asset::USDC,
                Asset::ETH,
                AssetAmount::whole(20, Asset::USDC),
            )
            .await;
        assert!(matches!(result, Err(QuoteError::NoLiquidity { .. })));
    }
}
