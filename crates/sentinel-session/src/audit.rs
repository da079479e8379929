//! Hash-chained session audit log
//!
//! Every decision, swap, simulation, state transition and failure lands
//! here, in one total order per session. Entries chain by SHA-256 so the
//! log is tamper-evident when exported.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tokio::sync::RwLock;
use uuid::Uuid;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    SessionOpened,
    ChannelDegraded,
    SwapSimulated,
    SwapExecuted,
    SwapRejected,
    SwapFailed,
    SessionClosing,
    SessionSettled,
    SessionError,
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SessionOpened => "session_opened",
            Self::ChannelDegraded => "channel_degraded",
            Self::SwapSimulated => "swap_simulated",
            Self::SwapExecuted => "swap_executed",
            Self::SwapRejected => "swap_rejected",
            Self::SwapFailed => "swap_failed",
            Self::SessionClosing => "session_closing",
            Self::SessionSettled => "session_settled",
            Self::SessionError => "session_error",
        };
        write!(f, "{}", s)
    }
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    /// Position in the log, starting at 0
    pub sequence: u64,
    pub kind: AuditKind,
    /// Session, proposal or transaction id this entry belongs to
    pub correlation_id: String,
    pub data: serde_json::Value,
    pub previous_hash: String,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    fn compute_hash(&self) -> String {
        let content = format!(
            "{}:{}:{}:{}:{}",
            self.previous_hash,
            self.sequence,
            self.kind,
            self.correlation_id,
            self.data
        );
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Append-only, hash-chained log
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn record(
        &self,
        kind: AuditKind,
        correlation_id: impl Into<String>,
        data: serde_json::Value,
    ) -> AuditEntry {
        let mut entries = self.entries.write().await;
        let previous_hash = entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| "genesis".to_string());

        let mut entry = AuditEntry {
            id: format!("audit_{}", Uuid::new_v4()),
            sequence: entries.len() as u64,
            kind,
            correlation_id: correlation_id.into(),
            data,
            previous_hash,
            hash: String::new(),
            timestamp: Utc::now(),
        };
        entry.hash = entry.compute_hash();
        entries.push(entry.clone());
        entry
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Walk the chain and check every link
    pub async fn verify_chain(&self) -> bool {
        let entries = self.entries.read().await;
        let mut previous = "genesis".to_string();
        for entry in entries.iter() {
            if entry.previous_hash != previous || !entry.verify() {
                return false;
            }
            previous = entry.hash.clone();
        }
        true
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_chain_in_order() {
        let log = AuditLog::new();
        log.record(AuditKind::SessionOpened, "sess_1", serde_json::json!({}))
            .await;
        log.record(
            AuditKind::SwapExecuted,
            "prop_1",
            serde_json::json!({"amountIn": "20"}),
        )
        .await;

        let entries = log.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 0);
        assert_eq!(entries[1].sequence, 1);
        assert_eq!(entries[1].previous_hash, entries[0].hash);
        assert!(log.verify_chain().await);
    }

    #[tokio::test]
    async fn tampering_breaks_the_chain() {
        let log = AuditLog::new();
        log.record(AuditKind::SessionOpened, "sess_1", serde_json::json!({}))
            .await;
        let mut entries = log.entries().await;
        entries[0].data = serde_json::json!({"forged": true});
        assert!(!entries[0].verify());
    }
}
