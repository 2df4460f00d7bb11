//! Transaction lifecycle types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;

/// Lifecycle status of a queued transaction
///
/// Transitions are monotone: `Pending -> Confirming -> {Success | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Confirming,
    Success,
    Failed,
}

impl TransactionStatus {
    /// Whether moving to `next` respects the monotone lifecycle
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Confirming) | (Confirming, Success) | (Confirming, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Failed)
    }
}

/// A transaction tracked by the queue and persisted across reloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    /// Source address, stored lower-cased
    pub address: String,
    pub chain_id: u64,
    pub status: TransactionStatus,
    /// JSON-RPC method the transaction dispatches
    pub method: String,
    pub params: Value,
    pub hash: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(
        clock: &Arc<dyn Clock>,
        method: impl Into<String>,
        params: Value,
        chain_id: u64,
        address: &str,
    ) -> Self {
        let now = clock.now();
        Self {
            id: Uuid::new_v4().to_string(),
            address: address.to_lowercase(),
            chain_id,
            status: TransactionStatus::Pending,
            method: method.into(),
            params,
            hash: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use serde_json::json;

    #[test]
    fn test_status_transitions_are_monotone() {
        use TransactionStatus::*;

        assert!(Pending.can_transition_to(Confirming));
        assert!(Confirming.can_transition_to(Success));
        assert!(Confirming.can_transition_to(Failed));

        // No skipping forward
        assert!(!Pending.can_transition_to(Success));
        assert!(!Pending.can_transition_to(Failed));

        // Never backward
        assert!(!Confirming.can_transition_to(Pending));
        assert!(!Success.can_transition_to(Confirming));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Success.can_transition_to(Failed));
    }

    #[test]
    fn test_status_serializes_screaming() {
        let s = serde_json::to_string(&TransactionStatus::Pending).unwrap();
        assert_eq!(s, r#""PENDING""#);
    }

    #[test]
    fn test_record_lowercases_address() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let record = TransactionRecord::new(
            &clock,
            "eth_sendTransaction",
            json!([{"to": "0x0"}]),
            42_161,
            "0xAbCd",
        );
        assert_eq!(record.address, "0xabcd");
        assert_eq!(record.status, TransactionStatus::Pending);
        assert_eq!(record.created_at, record.updated_at);
    }
}
