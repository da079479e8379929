//! Sentinel MCP Server
//!
//! A Model Context Protocol server that lets an untrusted agent drive a
//! policy-governed trading session. MCP uses JSON-RPC 2.0 over stdio: the
//! server reads requests from stdin and writes responses to stdout, so
//! tracing goes to stderr.
//!
//! ## Available Tools
//!
//! - `get_session_balance` - balance record + session summary for an asset
//! - `simulate_swap` - price a swap and preview the policy decision
//! - `propose_swap` - run the full pipeline; mutates balances only on
//!   approval
//! - `close_session_and_settle` - close the session and settle on-chain
//!
//! Every tool response carries `{success, data?, error?, policyDecision?,
//! timestamp}`. The agent's key is never present here: the session,
//! channel and settlement keys all belong to the operator.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use sentinel_chain::{GuardPolicy, LocalChain, NameRegistry};
use sentinel_channel::{ChannelLedger, ChannelSigner, LocalCosigner};
use sentinel_config::SentinelConfig;
use sentinel_policy::{PolicyDecision, PolicyEngine};
use sentinel_quote::FallbackOracle;
use sentinel_session::{ProposalOutcome, SessionManager};
use sentinel_settlement::{LocalChainBackend, SettlementClient};
use sentinel_types::{Asset, AssetAmount, BalanceView, EvmAddress};

/// Agent identity anchored in the naming registry
const AGENT_NAME: &str = "agent.sentinel.eth";

struct ServiceState {
    manager: SessionManager,
    settlement: SettlementClient,
}

// ============================================================================
// JSON-RPC Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: serde_json::Value,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: serde_json::Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

/// The envelope every tool responds with
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_decision: Option<PolicyDecision>,
    timestamp: chrono::DateTime<Utc>,
}

impl ToolResponse {
    fn ok(data: serde_json::Value, decision: Option<PolicyDecision>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            policy_decision: decision,
            timestamp: Utc::now(),
        }
    }

    fn fail(error: impl Into<String>, decision: Option<PolicyDecision>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            policy_decision: decision,
            timestamp: Utc::now(),
        }
    }

    fn into_value(self) -> serde_json::Value {
        serde_json::to_value(&self).unwrap_or_else(|e| {
            serde_json::json!({
                "success": false,
                "error": format!("response serialization failed: {}", e),
            })
        })
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; log to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("sentinel MCP server starting");

    let config = SentinelConfig::load(std::env::var("SENTINEL_CONFIG").ok().as_deref())?;
    let state = Arc::new(build_state(&config).await?);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::error!("failed to read line: {}", e);
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let response = JsonRpcResponse::error(
                    serde_json::Value::Null,
                    -32700,
                    format!("Parse error: {}", e),
                );
                writeln!(stdout, "{}", serde_json::to_string(&response)?).ok();
                stdout.flush().ok();
                continue;
            }
        };

        let response = handle_request(&state, request).await;
        writeln!(stdout, "{}", serde_json::to_string(&response)?).ok();
        stdout.flush().ok();
    }

    Ok(())
}

/// Wire the whole kernel: policy, oracle, channel, chain, settlement
async fn build_state(config: &SentinelConfig) -> anyhow::Result<ServiceState> {
    let policy_config = config.policy_config()?;
    let policy_hash = policy_config.fingerprint();
    let engine = PolicyEngine::new(policy_config);

    let operator = ChannelSigner::from_label("sentinel operator")?;
    let operator_address = operator.address();

    // Anchor the policy fingerprint to the agent identity and verify it
    // the way a fresh process would.
    let mut registry = NameRegistry::new();
    registry.register(AGENT_NAME, operator_address);
    registry.anchor_policy(AGENT_NAME, policy_hash.0.clone())?;
    registry.verify_policy_anchor(AGENT_NAME, &policy_hash.0, true)?;

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

    // The custodian opens the session; the agent only trades inside it.
    let session = manager.open(None).await?;
    tracing::info!(session = %session.session_id, "session opened for agent");

    Ok(ServiceState {
        manager,
        settlement,
    })
}

async fn handle_request(state: &Arc<ServiceState>, request: JsonRpcRequest) -> JsonRpcResponse {
    match request.method.as_str() {
        "initialize" => handle_initialize(request.id),
        "tools/list" => handle_tools_list(request.id),
        "tools/call" => handle_tools_call(state, request.id, request.params).await,
        "notifications/initialized" => JsonRpcResponse::success(request.id, serde_json::json!({})),
        other => {
            JsonRpcResponse::error(request.id, -32601, format!("Method not found: {}", other))
        }
    }
}

fn handle_initialize(id: serde_json::Value) -> JsonRpcResponse {
    JsonRpcResponse::success(
        id,
        serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": "sentinel",
                "version": env!("CARGO_PKG_VERSION")
            }
        }),
    )
}

fn asset_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "string",
        "enum": ["USDC", "ETH"],
    })
}

fn amount_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "string",
        "description": "Decimal amount, e.g. '20' or '19.6'"
    })
}

fn handle_tools_list(id: serde_json::Value) -> JsonRpcResponse {
    let tools = serde_json::json!([
        {
            "name": "get_session_balance",
            "description": "Get the session balance for one asset plus a summary of the whole session.",
            "inputSchema": {
                "type": "object",
                "properties": { "asset": asset_schema() },
                "required": ["asset"]
            }
        },
        {
            "name": "simulate_swap",
            "description": "Price a swap and preview the policy decision without touching any balance.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tokenIn": asset_schema(),
                    "tokenOut": asset_schema(),
                    "amount": amount_schema()
                },
                "required": ["tokenIn", "tokenOut", "amount"]
            }
        },
        {
            "name": "propose_swap",
            "description": "Propose a swap. It is quoted, screened by the policy engine, and applied to the co-signed balance sheet only if every rule passes.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tokenIn": asset_schema(),
                    "tokenOut": asset_schema(),
                    "amount": amount_schema()
                },
                "required": ["tokenIn", "tokenOut", "amount"]
            }
        },
        {
            "name": "close_session_and_settle",
            "description": "Close the session, finalize the channel and settle the final sheet on-chain.",
            "inputSchema": { "type": "object", "properties": {} }
        }
    ]);

    JsonRpcResponse::success(id, serde_json::json!({ "tools": tools }))
}

async fn handle_tools_call(
    state: &Arc<ServiceState>,
    id: serde_json::Value,
    params: serde_json::Value,
) -> JsonRpcResponse {
    let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or(serde_json::json!({}));

    let response = match tool_name {
        "get_session_balance" => get_session_balance(state, arguments).await,
        "simulate_swap" => simulate_swap(state, arguments).await,
        "propose_swap" => propose_swap(state, arguments).await,
        "close_session_and_settle" => close_session_and_settle(state).await,
        other => ToolResponse::fail(format!("Unknown tool: {}", other), None),
    };

    let is_error = !response.success;
    JsonRpcResponse::success(
        id,
        serde_json::json!({
            "content": [{
                "type": "text",
                "text": response.into_value().to_string(),
            }],
            "isError": is_error,
        }),
    )
}

// ============================================================================
// Tool Implementations
// ============================================================================

fn parse_asset(args: &serde_json::Value, key: &str) -> Result<Asset, String> {
    let symbol = args
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing '{}' parameter", key))?;
    Asset::from_symbol(symbol).map_err(|e| e.to_string())
}

fn parse_amount(args: &serde_json::Value, asset: Asset) -> Result<AssetAmount, String> {
    let value = args
        .get("amount")
        .ok_or_else(|| "Missing 'amount' parameter".to_string())?;
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return Err("'amount' must be a decimal string or number".to_string()),
    };
    AssetAmount::parse(asset, &text).map_err(|e| e.to_string())
}

async fn get_session_balance(state: &Arc<ServiceState>, args: serde_json::Value) -> ToolResponse {
    let asset = match parse_asset(&args, "asset") {
        Ok(a) => a,
        Err(e) => return ToolResponse::fail(e, None),
    };

    let summary = match state.manager.summary().await {
        Some(summary) => summary,
        None => return ToolResponse::fail("no active session", None),
    };
    let balance = state.manager.balance(asset).await;

    ToolResponse::ok(
        serde_json::json!({
            "balance": balance.as_ref().map(BalanceView::from_balance),
            "session": summary,
        }),
        None,
    )
}

async fn simulate_swap(state: &Arc<ServiceState>, args: serde_json::Value) -> ToolResponse {
    let (token_in, token_out) = match (parse_asset(&args, "tokenIn"), parse_asset(&args, "tokenOut"))
    {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => return ToolResponse::fail(e, None),
    };
    let amount = match parse_amount(&args, token_in) {
        Ok(a) => a,
        Err(e) => return ToolResponse::fail(e, None),
    };

    match state
        .manager
        .simulate_swap(token_in, token_out, amount, None, None)
        .await
    {
        Ok(simulation) => ToolResponse::ok(
            serde_json::json!({
                "estimatedAmountOut": simulation.quote.estimated_amount_out.to_display(),
                "priceImpactBps": simulation.quote.price_impact_bps,
                "route": simulation.quote.route,
                "estimatedGas": simulation.quote.estimated_gas,
                "wouldApprove": simulation.would_approve,
            }),
            Some(simulation.decision),
        ),
        Err(e) => ToolResponse::fail(e.to_string(), None),
    }
}

async fn propose_swap(state: &Arc<ServiceState>, args: serde_json::Value) -> ToolResponse {
    let (token_in, token_out) = match (parse_asset(&args, "tokenIn"), parse_asset(&args, "tokenOut"))
    {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => return ToolResponse::fail(e, None),
    };
    let amount = match parse_amount(&args, token_in) {
        Ok(a) => a,
        Err(e) => return ToolResponse::fail(e, None),
    };

    match state
        .manager
        .propose_swap(token_in, token_out, amount, None, None)
        .await
    {
        Ok(ProposalOutcome::Executed { result, decision }) => ToolResponse::ok(
            serde_json::json!({
                "proposalId": result.proposal_id,
                "amountIn": result.amount_in.to_display(),
                "amountOut": result.amount_out.to_display(),
                "executionType": result.execution_type,
            }),
            Some(decision),
        ),
        Ok(ProposalOutcome::Rejected { decision }) => {
            ToolResponse::fail("swap rejected by policy", Some(decision))
        }
        Err(e) => ToolResponse::fail(e.to_string(), None),
    }
}

async fn close_session_and_settle(state: &Arc<ServiceState>) -> ToolResponse {
    let closing = match state.manager.close().await {
        Ok(session) => session,
        Err(e) => return ToolResponse::fail(e.to_string(), None),
    };

    let record = match state.settlement.settle(&closing).await {
        Ok(record) => record,
        // Pre-validation and submission failures leave the session in
        // `closing`; the operator may retry after fixing the guard mirror.
        Err(e) => return ToolResponse::fail(e.to_string(), None),
    };

    let settled = match state.manager.mark_settled(record.tx_hash.clone()).await {
        Ok(session) => session,
        Err(e) => return ToolResponse::fail(e.to_string(), None),
    };

    ToolResponse::ok(
        serde_json::json!({
            "finalBalances": settled
                .balances
                .values()
                .map(BalanceView::from_balance)
                .collect::<Vec<_>>(),
            "txHash": record.tx_hash,
            "blockNumber": record.block_number,
        }),
        None,
    )
}
