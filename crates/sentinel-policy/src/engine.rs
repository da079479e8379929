//! The four-rule evaluation engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentinel_types::{AssetAmount, BalanceMap, SwapProposal};

use crate::config::{PolicyConfig, PolicyHash};

/// Number of rules; every decision carries exactly this many results
pub const RULE_COUNT: usize = 4;

/// Outcome of a single rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRuleResult {
    pub rule_id: String,
    pub rule_name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The observed value, as a decimal or identifier string
    pub value: String,
    /// The configured limit the value was held against
    pub limit: String,
}

/// The engine's verdict on a proposal
///
/// `approved` is the conjunction of all `passed` flags; the results vector
/// always holds all [`RULE_COUNT`] rules in fixed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub approved: bool,
    pub results: Vec<PolicyRuleResult>,
    pub evaluated_at: DateTime<Utc>,
    pub policy_hash: PolicyHash,
}

impl PolicyDecision {
    /// Rule ids of every failed rule, in rule order
    pub fn failed_rules(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.rule_id.as_str())
            .collect()
    }
}

/// The policy engine: immutable config plus its precomputed fingerprint
///
/// `evaluate` is pure: identical `(config, proposal, balances)` inputs
/// produce identical decisions modulo the timestamp. It never errors;
/// every failure mode is a failed rule.
pub struct PolicyEngine {
    config: PolicyConfig,
    policy_hash: PolicyHash,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        let policy_hash = config.fingerprint();
        Self {
            config,
            policy_hash,
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn policy_hash(&self) -> &PolicyHash {
        &self.policy_hash
    }

    /// Evaluate a proposal against the current balance snapshot
    pub fn evaluate(&self, proposal: &SwapProposal, balances: &BalanceMap) -> PolicyDecision {
        let results = vec![
            self.check_max_trade_size(proposal, balances),
            self.check_allowed_dex(proposal),
            self.check_allowed_assets(proposal),
            self.check_max_slippage(proposal),
        ];

        PolicyDecision {
            approved: results.iter().all(|r| r.passed),
            results,
            evaluated_at: Utc::now(),
            policy_hash: self.policy_hash.clone(),
        }
    }

    /// Rule 1: `amountIn <= balance * maxTradeBps / 10_000`, inclusive.
    ///
    /// A missing balance entry is an explicit failure, never a silent pass.
    fn check_max_trade_size(
        &self,
        proposal: &SwapProposal,
        balances: &BalanceMap,
    ) -> PolicyRuleResult {
        let rule_id = "max_trade_size".to_string();
        let rule_name = "Max Trade Size".to_string();
        let value = proposal.amount_in.to_display();

        let balance = match balances.get(&proposal.token_in) {
            Some(b) => b,
            None => {
                return PolicyRuleResult {
                    rule_id,
                    rule_name,
                    passed: false,
                    reason: Some(format!(
                        "no balance entry for {}",
                        proposal.token_in
                    )),
                    value,
                    limit: "0".to_string(),
                };
            }
        };

        // Integer floor; the cap never exceeds the exact rational bound.
        let cap_raw = balance.amount.raw * self.config.max_trade_bps as i128 / 10_000;
        let cap = AssetAmount::new(cap_raw, proposal.token_in);
        let passed = proposal.amount_in.raw <= cap_raw;

        PolicyRuleResult {
            rule_id,
            rule_name,
            passed,
            reason: if passed {
                None
            } else {
                Some(format!(
                    "amount {} {} exceeds {} bps cap of {} {}",
                    value,
                    proposal.token_in,
                    self.config.max_trade_bps,
                    cap.to_display(),
                    proposal.token_in,
                ))
            },
            value,
            limit: cap.to_display(),
        }
    }

    /// Rule 2: venue identifier must be in the allow-set (exact match)
    fn check_allowed_dex(&self, proposal: &SwapProposal) -> PolicyRuleResult {
        let passed = self.config.allowed_dexes.contains(&proposal.dex);
        let limit = self
            .config
            .allowed_dexes
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(",");

        PolicyRuleResult {
            rule_id: "allowed_dex".to_string(),
            rule_name: "Allowed DEX".to_string(),
            passed,
            reason: if passed {
                None
            } else {
                Some(format!("dex '{}' is not an allowed venue", proposal.dex))
            },
            value: proposal.dex.clone(),
            limit,
        }
    }

    /// Rule 3: both sides of the swap must be allowed assets; every
    /// violating side is reported
    fn check_allowed_assets(&self, proposal: &SwapProposal) -> PolicyRuleResult {
        let mut violations = Vec::new();
        if !self.config.allowed_assets.contains(&proposal.token_in) {
            violations.push(format!("tokenIn={}", proposal.token_in));
        }
        if !self.config.allowed_assets.contains(&proposal.token_out) {
            violations.push(format!("tokenOut={}", proposal.token_out));
        }

        let passed = violations.is_empty();
        let limit = self
            .config
            .allowed_assets
            .iter()
            .map(|a| a.symbol().to_string())
            .collect::<Vec<_>>()
            .join(",");

        PolicyRuleResult {
            rule_id: "allowed_assets".to_string(),
            rule_name: "Allowed Assets".to_string(),
            passed,
            reason: if passed {
                None
            } else {
                Some(format!("{} not in allowed assets", violations.join(", ")))
            },
            value: format!("{}->{}", proposal.token_in, proposal.token_out),
            limit,
        }
    }

    /// Rule 4: `proposal.maxSlippageBps <= policy.maxSlippageBps`, inclusive
    fn check_max_slippage(&self, proposal: &SwapProposal) -> PolicyRuleResult {
        let passed = proposal.max_slippage_bps <= self.config.max_slippage_bps;

        PolicyRuleResult {
            rule_id: "max_slippage".to_string(),
            rule_name: "Max Slippage".to_string(),
            passed,
            reason: if passed {
                None
            } else {
                Some(format!(
                    "slippage {} bps exceeds policy max {} bps",
                    proposal.max_slippage_bps, self.config.max_slippage_bps
                ))
            },
            value: proposal.max_slippage_bps.to_string(),
            limit: self.config.max_slippage_bps.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_types::{Asset, ProposalId, SessionBalance};

    fn proposal(amount_usdc: &str, dex: &str, slippage_bps: u32) -> SwapProposal {
        SwapProposal {
            id: ProposalId::generate(),
            token_in: Asset::USDC,
            token_out: Asset::ETH,
            amount_in: AssetAmount::parse(Asset::USDC, amount_usdc).unwrap(),
            estimated_amount_out: AssetAmount::zero(Asset::ETH),
            max_slippage_bps: slippage_bps,
            dex: dex.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn balances(usdc: &str) -> BalanceMap {
        let mut map = BalanceMap::new();
        map.insert(
            Asset::USDC,
            SessionBalance::opening(AssetAmount::parse(Asset::USDC, usdc).unwrap()),
        );
        map.insert(
            Asset::ETH,
            SessionBalance::opening(AssetAmount::zero(Asset::ETH)),
        );
        map
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::new(PolicyConfig::default())
    }

    #[test]
    fn all_rules_always_reported_in_order() {
        let decision = engine().evaluate(&proposal("10", "default-venue", 50), &balances("1000"));
        assert!(decision.approved);
        assert_eq!(decision.results.len(), RULE_COUNT);
        let ids: Vec<&str> = decision.results.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["max_trade_size", "allowed_dex", "allowed_assets", "max_slippage"]
        );
    }

    #[test]
    fn trade_size_boundary_is_inclusive() {
        // cap = 2% of 980 = 19.6 exactly
        let bals = balances("980");
        let at_cap = engine().evaluate(&proposal("19.6", "default-venue", 50), &bals);
        assert!(at_cap.approved);

        // one smallest unit over the cap
        let over = engine().evaluate(&proposal("19.600001", "default-venue", 50), &bals);
        assert!(!over.approved);
        assert_eq!(over.failed_rules(), vec!["max_trade_size"]);
        let rule = &over.results[0];
        assert_eq!(rule.value, "19.600001");
        assert_eq!(rule.limit, "19.6");
        assert!(rule.reason.as_deref().unwrap().contains("19.6"));
    }

    #[test]
    fn oversized_trade_reports_value_and_limit() {
        let decision = engine().evaluate(&proposal("50", "default-venue", 50), &balances("980"));
        assert!(!decision.approved);
        let rule = &decision.results[0];
        assert!(!rule.passed);
        assert_eq!(rule.value, "50");
        assert_eq!(rule.limit, "19.6");
    }

    #[test]
    fn missing_balance_entry_fails_rather_than_passing_as_zero() {
        let decision = engine().evaluate(
            &proposal("10", "default-venue", 50),
            &BalanceMap::new(),
        );
        assert!(!decision.approved);
        let rule = &decision.results[0];
        assert!(rule
            .reason
            .as_deref()
            .unwrap()
            .contains("no balance entry"));
    }

    #[test]
    fn disallowed_dex_is_exact_and_case_sensitive() {
        let bals = balances("1000");
        let curve = engine().evaluate(&proposal("10", "curve", 50), &bals);
        assert_eq!(curve.failed_rules(), vec!["allowed_dex"]);

        let wrong_case = engine().evaluate(&proposal("10", "Default-Venue", 50), &bals);
        assert_eq!(wrong_case.failed_rules(), vec!["allowed_dex"]);
    }

    #[test]
    fn disallowed_asset_reports_violating_side() {
        let restricted = PolicyEngine::new(
            PolicyConfig::new(200, 50, ["default-venue"], [Asset::USDC]).unwrap(),
        );
        let decision = restricted.evaluate(&proposal("10", "default-venue", 50), &balances("1000"));
        assert!(!decision.approved);
        let rule = decision
            .results
            .iter()
            .find(|r| r.rule_id == "allowed_assets")
            .unwrap();
        assert!(rule.reason.as_deref().unwrap().contains("tokenOut=ETH"));
        assert!(!rule.reason.as_deref().unwrap().contains("tokenIn"));
    }

    #[test]
    fn slippage_boundary_is_inclusive() {
        let bals = balances("1000");
        let at_max = engine().evaluate(&proposal("10", "default-venue", 50), &bals);
        assert!(at_max.approved);

        let one_over = engine().evaluate(&proposal("10", "default-venue", 51), &bals);
        assert!(!one_over.approved);
        assert_eq!(one_over.failed_rules(), vec!["max_slippage"]);
    }

    #[test]
    fn failures_are_reported_together() {
        let decision = engine().evaluate(&proposal("50", "curve", 51), &balances("980"));
        assert!(!decision.approved);
        assert_eq!(
            decision.failed_rules(),
            vec!["max_trade_size", "allowed_dex", "max_slippage"]
        );
    }

    #[test]
    fn evaluation_is_deterministic_modulo_timestamp() {
        let prop = proposal("10", "default-venue", 50);
        let bals = balances("1000");
        let e = engine();
        let mut a = e.evaluate(&prop, &bals);
        let mut b = e.evaluate(&prop, &bals);
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        a.evaluated_at = epoch;
        b.evaluated_at = epoch;
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn decision_carries_the_policy_fingerprint() {
        let e = engine();
        let decision = e.evaluate(&proposal("10", "default-venue", 50), &balances("1000"));
        assert_eq!(&decision.policy_hash, e.policy_hash());
    }
}
