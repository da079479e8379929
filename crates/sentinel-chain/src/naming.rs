//! Identity and policy anchoring
//!
//! The agent's identity is a human-readable name resolved through a
//! naming registry; a text record under a reserved key anchors the policy
//! fingerprint. The integrity check is resolve → read text record →
//! compare to the locally computed hash. A mismatch is a warning unless
//! strict mode is configured.

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use sentinel_types::EvmAddress;

/// Reserved text-record key holding the policy fingerprint
pub const POLICY_HASH_TEXT_KEY: &str = "com.sentinel.policyHash";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("name not registered: {name}")]
    NameNotFound { name: String },

    #[error("policy anchor mismatch for {name}: anchored {anchored}, local {local}")]
    AnchorMismatch {
        name: String,
        anchored: String,
        local: String,
    },
}

pub type Result<T> = std::result::Result<T, NamingError>;

/// Outcome of the anchor integrity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorStatus {
    /// Anchored hash equals the locally computed one
    Verified,
    /// No text record under the reserved key
    Missing,
    /// Hashes differ (only reachable in non-strict mode)
    Mismatch { anchored: String, local: String },
}

/// In-process name registry with text records
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: HashMap<String, EvmAddress>,
    texts: HashMap<(String, String), String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, address: EvmAddress) {
        self.names.insert(name.into(), address);
    }

    pub fn resolve(&self, name: &str) -> Option<EvmAddress> {
        self.names.get(name).copied()
    }

    pub fn set_text(
        &mut self,
        name: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        if !self.names.contains_key(name) {
            return Err(NamingError::NameNotFound {
                name: name.to_string(),
            });
        }
        self.texts
            .insert((name.to_string(), key.into()), value.into());
        Ok(())
    }

    pub fn text(&self, name: &str, key: &str) -> Option<&str> {
        self.texts
            .get(&(name.to_string(), key.to_string()))
            .map(String::as_str)
    }

    /// Anchor a policy fingerprint under the reserved key
    pub fn anchor_policy(&mut self, name: &str, policy_hash: impl Into<String>) -> Result<()> {
        self.set_text(name, POLICY_HASH_TEXT_KEY, policy_hash)
    }

    /// Compare the anchored fingerprint to the locally computed one
    pub fn verify_policy_anchor(
        &self,
        name: &str,
        local_hash: &str,
        strict: bool,
    ) -> Result<AnchorStatus> {
        if self.resolve(name).is_none() {
            return Err(NamingError::NameNotFound {
                name: name.to_string(),
            });
        }

        let anchored = match self.text(name, POLICY_HASH_TEXT_KEY) {
            Some(value) => value,
            None => {
                warn!(name, "no policy anchor text record");
                return Ok(AnchorStatus::Missing);
            }
        };

        if anchored == local_hash {
            return Ok(AnchorStatus::Verified);
        }

        if strict {
            return Err(NamingError::AnchorMismatch {
                name: name.to_string(),
                anchored: anchored.to_string(),
                local: local_hash.to_string(),
            });
        }

        warn!(name, anchored, local = local_hash, "policy anchor mismatch");
        Ok(AnchorStatus::Mismatch {
            anchored: anchored.to_string(),
            local: local_hash.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NameRegistry {
        let mut registry = NameRegistry::new();
        registry.register("agent.sentinel.eth", EvmAddress([1u8; 20]));
        registry
    }

    #[test]
    fn resolve_and_text_records() {
        let mut registry = registry();
        assert_eq!(
            registry.resolve("agent.sentinel.eth"),
            Some(EvmAddress([1u8; 20]))
        );
        assert_eq!(registry.resolve("unknown.eth"), None);

        registry.anchor_policy("agent.sentinel.eth", "abc123").unwrap();
        assert_eq!(
            registry.text("agent.sentinel.eth", POLICY_HASH_TEXT_KEY),
            Some("abc123")
        );
    }

    #[test]
    fn anchor_requires_registered_name() {
        let mut registry = registry();
        assert!(matches!(
            registry.anchor_policy("ghost.eth", "abc"),
            Err(NamingError::NameNotFound { .. })
        ));
    }

    #[test]
    fn verified_anchor() {
        let mut registry = registry();
        registry.anchor_policy("agent.sentinel.eth", "abc123").unwrap();
        assert_eq!(
            registry
                .verify_policy_anchor("agent.sentinel.eth", "abc123", true)
                .unwrap(),
            AnchorStatus::Verified
        );
    }

    #[test]
    fn mismatch_is_a_warning_unless_strict() {
        let mut registry = registry();
        registry.anchor_policy("agent.sentinel.eth", "abc123").unwrap();

        let lenient = registry
            .verify_policy_anchor("agent.sentinel.eth", "other", false)
            .unwrap();
        assert!(matches!(lenient, AnchorStatus::Mismatch { .. }));

        let strict = registry.verify_policy_anchor("agent.sentinel.eth", "other", true);
        assert!(matches!(strict, Err(NamingError::AnchorMismatch { .. })));
    }

    #[test]
    fn missing_record_is_reported() {
        let registry = registry();
        assert_eq!(
            registry
                .verify_policy_anchor("agent.sentinel.eth", "abc", true)
                .unwrap(),
            AnchorStatus::Missing
        );
    }
}
