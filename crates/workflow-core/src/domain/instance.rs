//! Workflow instances and node instances: the mutable execution state of a
//! running (or finished) workflow.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a `WorkflowInstance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status of a `NodeInstance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// A running (or finished) execution of a `WorkflowDefinition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub definition_id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub input_data: Value,
    pub output_data: Value,
    pub context_data: Value,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub paused_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: i32,
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
    pub business_key: Option<String>,
    pub mutex_key: Option<String>,
    pub assigned_engine_id: Option<Uuid>,
    pub lock_owner: Option<String>,
    /// Cache only — see `crate::store::InstanceStore` module docs. Never
    /// read for an ownership decision; the locks table is authoritative.
    pub lock_acquired_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Cache only, same caveat as `lock_acquired_at`.
    pub last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub created_by: Option<String>,
}

impl WorkflowInstance {
    /// Whether `status = running` but the engine-cached heartbeat looks
    /// stale against `liveness_window`. This is a cheap local hint only;
    /// scheduling decisions must still go through the Lock Service.
    pub fn looks_stale(&self, now: chrono::DateTime<chrono::Utc>, liveness_window: chrono::Duration) -> bool {
        self.status == WorkflowStatus::Running
            && self
                .last_heartbeat
                .map(|hb| now - hb > liveness_window)
                .unwrap_or(true)
    }
}

/// Execution state of a single node within a workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: Uuid,
    pub workflow_instance_id: Uuid,
    pub node_id: String,
    pub status: NodeStatus,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub output: Option<Value>,
}

impl NodeInstance {
    pub fn new_pending(workflow_instance_id: Uuid, node_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_instance_id,
            node_id: node_id.into(),
            status: NodeStatus::Pending,
            started_at: None,
            finished_at: None,
            output: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::Paused.is_terminal());
    }

    #[test]
    fn status_display_is_snake_case() {
        assert_eq!(WorkflowStatus::Paused.to_string(), "paused");
        assert_eq!(NodeStatus::Skipped.to_string(), "skipped");
    }

    #[test]
    fn serde_round_trip() {
        let json = serde_json::to_string(&WorkflowStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let parsed: WorkflowStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, WorkflowStatus::Running);
    }
}
