//! Transactions (§3 "Transaction", §4.10 start/commit/abort).

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    None,
    Active,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub txn_id: String,
    pub document_id: String,
    pub state: TransactionState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub operations: Vec<String>,
    pub rollback_snapshot: Snapshot,
    pub buffer: serde_json::Value,
}

impl Transaction {
    pub fn start(document_id: &str, rollback_snapshot: Snapshot) -> Self {
        Self {
            txn_id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            state: TransactionState::Active,
            started_at: Utc::now(),
            ended_at: None,
            operations: Vec::new(),
            rollback_snapshot,
            buffer: serde_json::json!({}),
        }
    }

    pub fn record_op(&mut self, op: impl Into<String>) {
        self.operations.push(op.into());
    }
}
