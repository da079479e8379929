//! Sentinel API Server
//!
//! The HTTP surface the dashboard (and an optional LLM agent) talks to.
//! All payloads are JSON; amounts travel as human-readable decimal
//! strings; identifiers are opaque strings. CORS is permissive so the
//! dashboard can call cross-origin.
//!
//! Routes:
//! - `GET    /api/session` - current session state
//! - `POST   /api/session` - open a session
//! - `DELETE /api/session` - close and settle
//! - `POST   /api/simulate` - dry-run a swap
//! - `POST   /api/swap` - propose a swap
//! - `GET    /api/policy` - active policy and fingerprint
//! - `GET    /api/audit` - the audit log
//! - `GET    /api/status` - service status

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

use sentinel_chain::{GuardPolicy, LocalChain};
use sentinel_channel::{ChannelLedger, ChannelSigner, LocalCosigner};
use sentinel_config::SentinelConfig;
use sentinel_policy::{PolicyDecision, PolicyEngine};
use sentinel_quote::FallbackOracle;
use sentinel_session::{ProposalOutcome, SessionManager};
use sentinel_settlement::{LocalChainBackend, SettlementClient};
use sentinel_types::{Asset, AssetAmount, BalanceView, EvmAddress};

#[derive(Parser, Debug)]
#[command(name = "sentinel-api-server", about = "Sentinel HTTP API")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Listen port
    #[arg(long, default_value_t = 3100)]
    port: u16,
}

struct AppState {
    manager: SessionManager,
    settlement: SettlementClient,
    chain: Arc<RwLock<LocalChain>>,
}

/// Envelope shared with the tool surface
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_decision: Option<PolicyDecision>,
    timestamp: chrono::DateTime<Utc>,
}

impl ApiResponse {
    fn ok(data: serde_json::Value, decision: Option<PolicyDecision>) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            policy_decision: decision,
            timestamp: Utc::now(),
        })
    }

    fn fail(error: impl Into<String>, decision: Option<PolicyDecision>) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(error.into()),
            policy_decision: decision,
            timestamp: Utc::now(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = SentinelConfig::load(args.config.as_deref())?;
    let state = Arc::new(build_state(&config).await?);

    let app = Router::new()
        .route(
            "/api/session",
            get(get_session).post(open_session).delete(close_session),
        )
        .route("/api/simulate", post(simulate))
        .route("/api/swap", post(swap))
        .route("/api/policy", get(get_policy))
        .route("/api/audit", get(get_audit))
        .route("/api/status", get(get_status))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!("sentinel API listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_state(config: &SentinelConfig) -> anyhow::Result<AppState> {
    let policy_config = config.policy_config()?;
    let policy_hash = policy_config.fingerprint();
    let engine = PolicyEngine::new(policy_config);

    let operator = ChannelSigner::from_label("sentinel operator")?;
    let operator_address = operator.address();

    let chain = Arc::new(RwLock::new(LocalChain::deploy(
        operator_address,
        EvmAddress([0xEE; 20]),
        GuardPolicy {
            max_settlement_usdc: 1_000_000 * 1_000_000,
            max_settlement_eth: 1_000 * 10i128.pow(18),
            allowed_tokens: [EvmAddress::parse(Asset::USDC.token_address())?]
                .into_iter()
                .collect(),
            policy_hash: policy_hash.0.clone(),
        },
    )));

    let ledger = ChannelLedger::new(operator, Arc::new(LocalCosigner::broker()?))
        .with_cosign_timeout(std::time::Duration::from_millis(config.session.timeout_ms));

    let manager = SessionManager::new(
        engine,
        Arc::new(FallbackOracle::local_only()),
        Some(Arc::new(ledger)),
        config.session_settings()?,
    );

    let settlement =
        SettlementClient::new(Arc::new(LocalChainBackend::new(chain.clone()).await));

    Ok(AppState {
        manager,
        settlement,
        chain,
    })
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenRequest {
    deposit_usdc: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequest {
    token_in: String,
    token_out: String,
    amount: serde_json::Value,
    max_slippage_bps: Option<u32>,
    dex: Option<String>,
}

impl SwapRequest {
    fn parse(&self) -> Result<(Asset, Asset, AssetAmount), String> {
        let token_in = Asset::from_symbol(&self.token_in).map_err(|e| e.to_string())?;
        let token_out = Asset::from_symbol(&self.token_out).map_err(|e| e.to_string())?;
        let text = match &self.amount {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return Err("'amount' must be a decimal string or number".to_string()),
        };
        let amount = AssetAmount::parse(token_in, &text).map_err(|e| e.to_string())?;
        Ok((token_in, token_out, amount))
    }
}

async fn get_session(State(state): State<Arc<AppState>>) -> Json<ApiResponse> {
    match state.manager.session().await {
        Some(session) => ApiResponse::ok(
            serde_json::to_value(&session).unwrap_or_default(),
            None,
        ),
        None => ApiResponse::fail("no session", None),
    }
}

async fn open_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OpenRequest>,
) -> Json<ApiResponse> {
    let deposit = match &request.deposit_usdc {
        Some(text) => match AssetAmount::parse(Asset::USDC, text) {
            Ok(amount) => Some(amount),
            Err(e) => return ApiResponse::fail(e.to_string(), None),
        },
        None => None,
    };

    match state.manager.open(deposit).await {
        Ok(session) => ApiResponse::ok(serde_json::to_value(&session).unwrap_or_default(), None),
        Err(e) => ApiResponse::fail(e.to_string(), None),
    }
}

async fn close_session(State(state): State<Arc<AppState>>) -> Json<ApiResponse> {
    let closing = match state.manager.close().await {
        Ok(session) => session,
        Err(e) => return ApiResponse::fail(e.to_string(), None),
    };

    let record = match state.settlement.settle(&closing).await {
        Ok(record) => record,
        Err(e) => return ApiResponse::fail(e.to_string(), None),
    };

    match state.manager.mark_settled(record.tx_hash.clone()).await {
        Ok(settled) => ApiResponse::ok(
            serde_json::json!({
                "session": settled,
                "settlement": record,
            }),
            None,
        ),
        Err(e) => ApiResponse::fail(e.to_string(), None),
    }
}

async fn simulate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SwapRequest>,
) -> Json<ApiResponse> {
    let (token_in, token_out, amount) = match request.parse() {
        Ok(parsed) => parsed,
        Err(e) => return ApiResponse::fail(e, None),
    };

    match state
        .manager
        .simulate_swap(
            token_in,
            token_out,
            amount,
            request.max_slippage_bps,
            request.dex.as_deref(),
        )
        .await
    {
        Ok(simulation) => ApiResponse::ok(
            serde_json::json!({
                "estimatedAmountOut": simulation.quote.estimated_amount_out.to_display(),
                "priceImpactBps": simulation.quote.price_impact_bps,
                "route": simulation.quote.route,
                "wouldApprove": simulation.would_approve,
            }),
            Some(simulation.decision),
        ),
        Err(e) => ApiResponse::fail(e.to_string(), None),
    }
}

async fn swap(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SwapRequest>,
) -> Json<ApiResponse> {
    let (token_in, token_out, amount) = match request.parse() {
        Ok(parsed) => parsed,
        Err(e) => return ApiResponse::fail(e, None),
    };

    match state
        .manager
        .propose_swap(
            token_in,
            token_out,
            amount,
            request.max_slippage_bps,
            request.dex.as_deref(),
        )
        .await
    {
        Ok(ProposalOutcome::Executed { result, decision }) => ApiResponse::ok(
            serde_json::to_value(&result).unwrap_or_default(),
            Some(decision),
        ),
        Ok(ProposalOutcome::Rejected { decision }) => {
            ApiResponse::fail("swap rejected by policy", Some(decision))
        }
        Err(e) => ApiResponse::fail(e.to_string(), None),
    }
}

async fn get_policy(State(state): State<Arc<AppState>>) -> Json<ApiResponse> {
    let policy = state.manager.policy();
    ApiResponse::ok(
        serde_json::json!({
            "config": policy.config(),
            "policyHash": policy.policy_hash(),
        }),
        None,
    )
}

async fn get_audit(State(state): State<Arc<AppState>>) -> Json<ApiResponse> {
    let entries = state.manager.audit_entries().await;
    ApiResponse::ok(serde_json::to_value(&entries).unwrap_or_default(), None)
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse> {
    let summary = state.manager.summary().await;
    let channel = state.manager.channel_session().await;
    let block_number = state.chain.read().await.block_number();

    ApiResponse::ok(
        serde_json::json!({
            "session": summary,
            "channel": channel.map(|c| serde_json::json!({
                "channelId": c.channel_id,
                "status": c.status,
                "turnNum": c.current_state.turn_num,
                "states": c.state_history.len(),
            })),
            "policyHash": state.manager.policy_hash(),
            "blockNumber": block_number,
            "balances": summary_balances(&state).await,
        }),
        None,
    )
}

async fn summary_balances(state: &Arc<AppState>) -> Option<Vec<BalanceView>> {
    state
        .manager
        .session()
        .await
        .map(|s| s.balances.values().map(BalanceView::from_balance).collect())
}
