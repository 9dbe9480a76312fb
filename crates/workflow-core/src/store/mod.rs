//! Instance Store (C3): persistence of workflow instances, node instances,
//! and failover events.
//!
//! Grounded on `persistence/postgres.rs`'s transactional `claim_task`
//! (CTE + `FOR UPDATE SKIP LOCKED`, conditional requeue) for the
//! compare-and-set update shape, and `persistence/store.rs`'s
//! `WorkflowEventStore` trait for the overall "one trait, two impls"
//! layout. Unlike the teacher, there is no event log here (SPEC_FULL.md
//! §3 has no event sourcing): rows are mutated in place.

mod memory;
mod postgres;

pub use memory::InMemoryInstanceStore;
pub use postgres::PostgresInstanceStore;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{FailoverEvent, NodeInstance, NodeStatus, WorkflowInstance, WorkflowStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("concurrency conflict: expected owner {expected}, actual {actual}")]
    ConcurrencyConflict { expected: String, actual: String },

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Partial update applied by `update_status`; `None` fields are left
/// untouched. `completed_at` is derived from the target status by the
/// store itself (SPEC_FULL.md §3 invariant (b)), not passed in here.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub output_data: Option<Value>,
    pub context_data: Option<Value>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub retry_count: Option<u32>,
    pub assigned_engine_id: Option<Uuid>,
    pub lock_owner: Option<String>,
    pub paused_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// The whitelist of allowed `WorkflowStatus` transitions from
/// SPEC_FULL.md §4.7. `updateStatus` enforces this centrally so no caller
/// can sneak an instance into an invalid state.
pub fn is_allowed_transition(from: WorkflowStatus, to: WorkflowStatus) -> bool {
    use WorkflowStatus::*;
    match (from, to) {
        (Pending, Running) => true,
        (Running, Paused) => true,
        (Paused, Running) => true,
        (Running, Completed) => true,
        (Running, Failed) => true,
        (Running, Pending) => true, // retry
        (s, Cancelled) if !s.is_terminal() => true,
        _ => false,
    }
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn create_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError>;

    async fn get_instance(&self, id: Uuid) -> Result<WorkflowInstance, StoreError>;

    /// Centralized, whitelist-checked state transition (SPEC_FULL.md
    /// §4.7). Returns `StoreError::InvalidTransition` for any (from, to)
    /// pair not in [`is_allowed_transition`].
    async fn update_status(
        &self,
        id: Uuid,
        new_status: WorkflowStatus,
        patch: StatusPatch,
    ) -> Result<(), StoreError>;

    async fn find_by_assigned_engine(
        &self,
        engine_id: Uuid,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<WorkflowInstance>, StoreError>;

    async fn find_by_mutex_key(
        &self,
        key: &str,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowInstance>, StoreError>;

    // -- node instances --

    async fn upsert_node_instance(&self, node: NodeInstance) -> Result<(), StoreError>;

    async fn get_node_instance(
        &self,
        workflow_instance_id: Uuid,
        node_id: &str,
    ) -> Result<Option<NodeInstance>, StoreError>;

    async fn find_running_nodes_by_engine(
        &self,
        engine_id: Uuid,
    ) -> Result<Vec<(Uuid, String)>, StoreError>;

    /// Sets status from `running` back to `pending` and clears
    /// `started_at`, for the `(workflow_instance_id, node_id)` pairs
    /// given, in a single transaction (SPEC_FULL.md §4.3).
    async fn reset_nodes(&self, node_ids: &[(Uuid, String)]) -> Result<(), StoreError>;

    /// Reassigns `instance_ids` to `to_engine_id` in a single transaction,
    /// conditional on the previous `assigned_engine_id` equalling
    /// `expected_engine_id` (optimistic concurrency, SPEC_FULL.md §4.3).
    /// Returns the count actually transferred; a mismatch on the expected
    /// owner simply excludes that row, it is not an error.
    async fn transfer_instances(
        &self,
        instance_ids: &[Uuid],
        expected_engine_id: Uuid,
        to_engine_id: Uuid,
    ) -> Result<u64, StoreError>;

    // -- failover events --

    async fn create_failover_event(&self, event: FailoverEvent) -> Result<(), StoreError>;

    async fn update_failover_event(&self, event: FailoverEvent) -> Result<(), StoreError>;

    async fn list_failover_events(&self) -> Result<Vec<FailoverEvent>, StoreError>;
}

pub(crate) fn node_status_name(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Pending => "pending",
        NodeStatus::Running => "running",
        NodeStatus::Completed => "completed",
        NodeStatus::Failed => "failed",
        NodeStatus::Skipped => "skipped",
    }
}

pub(crate) fn parse_node_status(s: &str) -> Result<NodeStatus, StoreError> {
    Ok(match s {
        "pending" => NodeStatus::Pending,
        "running" => NodeStatus::Running,
        "completed" => NodeStatus::Completed,
        "failed" => NodeStatus::Failed,
        "skipped" => NodeStatus::Skipped,
        other => return Err(StoreError::Database(format!("unknown node status `{other}`"))),
    })
}

pub(crate) fn workflow_status_name(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Pending => "pending",
        WorkflowStatus::Running => "running",
        WorkflowStatus::Paused => "paused",
        WorkflowStatus::Completed => "completed",
        WorkflowStatus::Failed => "failed",
        WorkflowStatus::Cancelled => "cancelled",
    }
}

pub(crate) fn parse_workflow_status(s: &str) -> Result<WorkflowStatus, StoreError> {
    Ok(match s {
        "pending" => WorkflowStatus::Pending,
        "running" => WorkflowStatus::Running,
        "paused" => WorkflowStatus::Paused,
        "completed" => WorkflowStatus::Completed,
        "failed" => WorkflowStatus::Failed,
        "cancelled" => WorkflowStatus::Cancelled,
        other => {
            return Err(StoreError::Database(format!(
                "unknown workflow status `{other}`"
            )))
        }
    })
}

pub(crate) fn parse_failover_status(s: &str) -> Result<crate::domain::FailoverStatus, StoreError> {
    use crate::domain::FailoverStatus::*;
    Ok(match s {
        "initiated" => Initiated,
        "in_progress" => InProgress,
        "completed" => Completed,
        "failed" => Failed,
        other => {
            return Err(StoreError::Database(format!(
                "unknown failover status `{other}`"
            )))
        }
    })
}
