//! Sentinel Config - strict configuration loading
//!
//! Sources, in increasing precedence: an optional TOML file, then
//! `SENTINEL_`-prefixed environment variables (`__` as the section
//! separator). Every section carries `deny_unknown_fields`, so an option
//! the core does not recognize fails the load instead of being silently
//! ignored.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sentinel_policy::{PolicyConfig, PolicyConfigError};
use sentinel_session::SessionSettings;
use sentinel_types::{Asset, AssetAmount, SentinelError};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration load failed: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid policy section: {0}")]
    Policy(#[from] PolicyConfigError),

    #[error("invalid value for {field}: {source}")]
    Value {
        field: &'static str,
        source: SentinelError,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SentinelConfig {
    #[serde(default)]
    pub policy: PolicySection,

    #[serde(default)]
    pub session: SessionSection,

    /// Address book of the on-chain contracts
    #[serde(default)]
    pub contracts: ContractsSection,

    #[serde(default)]
    pub rpc: RpcSection,
}

/// `[policy]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    /// Per-swap cap as a fraction of the input-asset balance, in basis
    /// points (200 = 2%)
    #[serde(default = "default_max_trade_bps")]
    pub max_trade_bps: u32,

    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: u32,

    #[serde(default = "default_allowed_dexes")]
    pub allowed_dexes: Vec<String>,

    /// Asset symbols (exact, case-sensitive)
    #[serde(default = "default_allowed_assets")]
    pub allowed_assets: Vec<String>,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            max_trade_bps: default_max_trade_bps(),
            max_slippage_bps: default_max_slippage_bps(),
            allowed_dexes: default_allowed_dexes(),
            allowed_assets: default_allowed_assets(),
        }
    }
}

/// `[session]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSection {
    /// Opening allocation as a decimal USDC string
    #[serde(default = "default_deposit_usdc")]
    pub default_deposit_usdc: String,

    #[serde(default = "default_max_actions")]
    pub max_actions_per_session: u32,

    /// Bound on channel/settlement round-trips
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            default_deposit_usdc: default_deposit_usdc(),
            max_actions_per_session: default_max_actions(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// `[contracts]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractsSection {
    pub policy_guard: Option<String>,
    pub vault: Option<String>,
    pub quoter: Option<String>,
    pub usdc_token: Option<String>,
    pub weth_token: Option<String>,
}

/// `[rpc]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcSection {
    pub endpoint: Option<String>,
}

fn default_max_trade_bps() -> u32 {
    200
}

fn default_max_slippage_bps() -> u32 {
    50
}

fn default_allowed_dexes() -> Vec<String> {
    vec!["default-venue".to_string()]
}

fn default_allowed_assets() -> Vec<String> {
    vec!["USDC".to_string(), "ETH".to_string()]
}

fn default_deposit_usdc() -> String {
    "1000".to_string()
}

fn default_max_actions() -> u32 {
    50
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl SentinelConfig {
    /// Load from an optional file plus the environment. Unknown options
    /// are a hard error.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SENTINEL")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("policy.allowed_dexes")
                .with_list_parse_key("policy.allowed_assets"),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Build the immutable policy from the `[policy]` section
    pub fn policy_config(&self) -> Result<PolicyConfig> {
        let mut assets = Vec::with_capacity(self.policy.allowed_assets.len());
        for symbol in &self.policy.allowed_assets {
            let asset = Asset::from_symbol(symbol).map_err(|source| ConfigError::Value {
                field: "policy.allowed_assets",
                source,
            })?;
            assets.push(asset);
        }

        Ok(PolicyConfig::new(
            self.policy.max_trade_bps,
            self.policy.max_slippage_bps,
            self.policy.allowed_dexes.iter().cloned(),
            assets,
        )?)
    }

    /// Build the session-manager tunables from the `[session]` section
    pub fn session_settings(&self) -> Result<SessionSettings> {
        let default_deposit = AssetAmount::parse(Asset::USDC, &self.session.default_deposit_usdc)
            .map_err(|source| ConfigError::Value {
                field: "session.default_deposit_usdc",
                source,
            })?;

        Ok(SessionSettings {
            default_deposit,
            max_actions: self.session.max_actions_per_session,
        })
    }
}
