//! Failover event records written by the Scheduler (`crate::scheduler`) and
//! persisted by the Instance Store (`crate::store`).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a `FailoverEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStatus {
    Initiated,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for FailoverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailoverStatus::Initiated => "initiated",
            FailoverStatus::InProgress => "in_progress",
            FailoverStatus::Completed => "completed",
            FailoverStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Record of one failover: a dead engine's work reassigned to a live one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub event_id: Uuid,
    pub failed_engine_id: Uuid,
    pub takeover_engine_id: Option<Uuid>,
    pub reason: String,
    pub affected_workflow_ids: Vec<Uuid>,
    pub status: FailoverStatus,
    pub failover_at: chrono::DateTime<chrono::Utc>,
    pub recovery_completed_at: Option<chrono::DateTime<chrono::Utc>>,
}
