//! Sentinel Demo - Complete Session Cycle
//!
//! Walks the whole kernel end to end:
//!
//! Open → Simulate → Swap → Rejected Swap → Close → Settle → Replay check
//!
//! Run with:
//!   cargo run -p sentinel-settlement --example full_cycle

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use sentinel_chain::{GuardPolicy, LocalChain};
use sentinel_channel::{ChannelLedger, ChannelSigner, LocalCosigner};
use sentinel_policy::{PolicyConfig, PolicyEngine};
use sentinel_quote::FallbackOracle;
use sentinel_session::{ProposalOutcome, SessionManager, SessionSettings};
use sentinel_settlement::{LocalChainBackend, SettlementClient};
use sentinel_types::{Asset, AssetAmount, EvmAddress};

fn banner(step: &str) {
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(" {}", step);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

#[tokio::main]
async fn main() {
    println!();
    println!("  SENTINEL - policy-governed trading sessions for AI agents");
    println!();

    banner("Step 1: Policy");
    let policy_config = PolicyConfig::default();
    let policy_hash = policy_config.fingerprint();
    println!("  max trade: {} bps of balance", policy_config.max_trade_bps);
    println!("  max slippage: {} bps", policy_config.max_slippage_bps);
    println!("  fingerprint: {}", policy_hash);
    println!();

    banner("Step 2: Deploy guard + vault");
    let operator = ChannelSigner::from_label("demo operator").expect("operator key");
    let chain = Arc::new(RwLock::new(LocalChain::deploy(
        operator.address(),
        EvmAddress([0xEE; 20]),
        GuardPolicy {
            max_settlement_usdc: 10_000 * 1_000_000,
            max_settlement_eth: 10 * 10i128.pow(18),
            allowed_tokens: BTreeSet::from([
                EvmAddress::parse(Asset::USDC.token_address()).expect("usdc address")
            ]),
            policy_hash: policy_hash.0.clone(),
        },
    )));
    println!("  operator: {}", operator.address());
    println!("  vault:    {}", chain.read().await.vault().address());
    println!();

    banner("Step 3: Open session (1000 USDC, co-signed channel)");
    let ledger = ChannelLedger::new(operator, Arc::new(LocalCosigner::broker().expect("broker")));
    let manager = SessionManager::new(
        PolicyEngine::new(policy_config),
        Arc::new(FallbackOracle::local_only()),
        Some(Arc::new(ledger)),
        SessionSettings::default(),
    );
    let session = manager
        .open(Some(AssetAmount::whole(1000, Asset::USDC)))
        .await
        .expect("open session");
    println!("  session: {}", session.session_id);
    println!("  mode:    {:?}", session.channel_mode);
    println!();

    banner("Step 4: Simulate then propose 20 USDC -> ETH");
    let sim = manager
        .simulate_swap(
            Asset::USDC,
            Asset::ETH,
            AssetAmount::whole(20, Asset::USDC),
            None,
            None,
        )
        .await
        .expect("simulate");
    println!(
        "  quote: {} ETH (impact {} bps), would approve: {}",
        sim.quote.estimated_amount_out.to_display(),
        sim.quote.price_impact_bps,
        sim.would_approve
    );

    let outcome = manager
        .propose_swap(
            Asset::USDC,
            Asset::ETH,
            AssetAmount::whole(20, Asset::USDC),
            None,
            None,
        )
        .await
        .expect("propose");
    match &outcome {
        ProposalOutcome::Executed { result, .. } => {
            println!(
                "  executed: {} USDC -> {} ETH",
                result.amount_in.to_display(),
                result.amount_out.to_display()
            );
        }
        ProposalOutcome::Rejected { .. } => println!("  unexpected rejection"),
    }
    println!();

    banner("Step 5: An oversized swap is rejected, balances untouched");
    let rejected = manager
        .propose_swap(
            Asset::USDC,
            Asset::ETH,
            AssetAmount::whole(50, Asset::USDC),
            None,
            None,
        )
        .await
        .expect("propose");
    if let ProposalOutcome::Rejected { decision } = &rejected {
        for rule in decision.results.iter().filter(|r| !r.passed) {
            println!(
                "  rule '{}' failed: value {}, limit {}",
                rule.rule_id, rule.value, rule.limit
            );
        }
    }
    let balance = manager.balance(Asset::USDC).await.expect("balance");
    println!("  USDC balance still: {}", balance.amount.to_display());
    println!();

    banner("Step 6: Close, settle on-chain, verify replay protection");
    let closing = manager.close().await.expect("close");
    let client = SettlementClient::new(Arc::new(LocalChainBackend::new(chain.clone()).await));
    let record = client.settle(&closing).await.expect("settle");
    manager
        .mark_settled(record.tx_hash.clone())
        .await
        .expect("mark settled");
    println!("  tx:    {}", record.tx_hash);
    println!("  block: {}", record.block_number);

    let replay = client.settle(&closing).await;
    println!(
        "  replay attempt: {}",
        match replay {
            Err(e) => format!("rejected ({})", e),
            Ok(_) => "UNEXPECTEDLY ACCEPTED".to_string(),
        }
    );
    println!();

    banner("Audit trail");
    for entry in manager.audit_entries().await {
        println!("  [{}] {}", entry.sequence, entry.kind);
    }
    println!();
    println!("  done: every path went through policy -> session -> ledger -> guard");
}
