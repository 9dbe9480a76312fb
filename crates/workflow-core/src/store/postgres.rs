use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use super::{
    is_allowed_transition, node_status_name, parse_failover_status, parse_node_status,
    parse_workflow_status, workflow_status_name, InstanceStore, StatusPatch, StoreError,
};
use crate::domain::{FailoverEvent, NodeInstance, WorkflowInstance, WorkflowStatus};

#[derive(Clone)]
pub struct PostgresInstanceStore {
    pool: PgPool,
}

impl PostgresInstanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_instance(row: sqlx::postgres::PgRow) -> Result<WorkflowInstance, StoreError> {
    let status_str: String = row.get("status");
    Ok(WorkflowInstance {
        id: row.get("id"),
        definition_id: row.get("workflow_definition_id"),
        name: row.get("name"),
        status: parse_workflow_status(&status_str)?,
        input_data: row.get("input_data"),
        output_data: row.get("output_data"),
        context_data: row.get("context_data"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        paused_at: row.get("paused_at"),
        error_message: row.get("error_message"),
        error_details: row.get("error_details"),
        retry_count: row.get::<i32, _>("retry_count") as u32,
        max_retries: row.get::<i32, _>("max_retries") as u32,
        priority: row.get("priority"),
        scheduled_at: row.get("scheduled_at"),
        business_key: row.get("business_key"),
        mutex_key: row.get("mutex_key"),
        assigned_engine_id: row.get("assigned_engine_id"),
        lock_owner: row.get("lock_owner"),
        lock_acquired_at: row.get("lock_acquired_at"),
        last_heartbeat: row.get("last_heartbeat"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        created_by: row.get("created_by"),
    })
}

fn row_to_node(row: sqlx::postgres::PgRow) -> Result<NodeInstance, StoreError> {
    let status_str: String = row.get("status");
    Ok(NodeInstance {
        id: row.get("id"),
        workflow_instance_id: row.get("workflow_instance_id"),
        node_id: row.get("node_id"),
        status: parse_node_status(&status_str)?,
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        output: row.get("output"),
    })
}

fn row_to_failover(row: sqlx::postgres::PgRow) -> Result<FailoverEvent, StoreError> {
    let status_str: String = row.get("status");
    let affected_json: serde_json::Value = row.get("affected_workflows");
    let affected_workflow_ids: Vec<Uuid> =
        serde_json::from_value(affected_json).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(FailoverEvent {
        event_id: row.get("event_id"),
        failed_engine_id: row.get("failed_engine_id"),
        takeover_engine_id: row.get("takeover_engine_id"),
        reason: row.get("failover_reason"),
        affected_workflow_ids,
        status: parse_failover_status(&status_str)?,
        failover_at: row.get("failover_at"),
        recovery_completed_at: row.get("recovery_completed_at"),
    })
}

#[async_trait]
impl InstanceStore for PostgresInstanceStore {
    #[instrument(skip(self, instance), fields(id = %instance.id))]
    async fn create_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_instances (
                id, workflow_definition_id, name, status, input_data, output_data, context_data,
                started_at, completed_at, paused_at, error_message, error_details,
                retry_count, max_retries, priority, scheduled_at, business_key, mutex_key,
                assigned_engine_id, lock_owner, lock_acquired_at, last_heartbeat,
                created_at, updated_at, created_by
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                $19, $20, $21, $22, $23, $24, $25
            )
            "#,
        )
        .bind(instance.id)
        .bind(instance.definition_id)
        .bind(&instance.name)
        .bind(workflow_status_name(instance.status))
        .bind(&instance.input_data)
        .bind(&instance.output_data)
        .bind(&instance.context_data)
        .bind(instance.started_at)
        .bind(instance.completed_at)
        .bind(instance.paused_at)
        .bind(&instance.error_message)
        .bind(&instance.error_details)
        .bind(instance.retry_count as i32)
        .bind(instance.max_retries as i32)
        .bind(instance.priority)
        .bind(instance.scheduled_at)
        .bind(&instance.business_key)
        .bind(&instance.mutex_key)
        .bind(instance.assigned_engine_id)
        .bind(&instance.lock_owner)
        .bind(instance.lock_acquired_at)
        .bind(instance.last_heartbeat)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .bind(&instance.created_by)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> Result<WorkflowInstance, StoreError> {
        let row = sqlx::query("SELECT * FROM workflow_instances WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row_to_instance(row)
    }

    #[instrument(skip(self, patch))]
    async fn update_status(
        &self,
        id: Uuid,
        new_status: WorkflowStatus,
        patch: StatusPatch,
    ) -> Result<(), StoreError> {
        let mut tx: Transaction<'_, Postgres> = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let row = sqlx::query("SELECT status, assigned_engine_id FROM workflow_instances WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let current_status = parse_workflow_status(&row.get::<String, _>("status"))?;
        let current_engine: Option<Uuid> = row.get("assigned_engine_id");

        if current_status != new_status && !is_allowed_transition(current_status, new_status) {
            return Err(StoreError::InvalidTransition {
                from: current_status.to_string(),
                to: new_status.to_string(),
            });
        }

        // Compare-and-set on the owning engine when the patch changes it:
        // the caller must match the row's current owner, matching
        // SPEC_FULL.md §4.3's optimistic-concurrency requirement.
        if let Some(new_engine) = patch.assigned_engine_id {
            if let Some(existing) = current_engine {
                if existing != new_engine && current_status == WorkflowStatus::Running {
                    return Err(StoreError::ConcurrencyConflict {
                        expected: existing.to_string(),
                        actual: new_engine.to_string(),
                    });
                }
            }
        }

        let completed_at_expr = if new_status.is_terminal() {
            "now()"
        } else {
            "NULL"
        };
        let started_at_expr = if new_status == WorkflowStatus::Running {
            "COALESCE(started_at, now())"
        } else {
            "started_at"
        };

        let query = format!(
            r#"
            UPDATE workflow_instances
            SET status = $2,
                started_at = {started_at_expr},
                completed_at = {completed_at_expr},
                paused_at = CASE WHEN $2 = 'paused' THEN now() ELSE paused_at END,
                output_data = COALESCE($3, output_data),
                context_data = COALESCE($4, context_data),
                error_message = COALESCE($5, error_message),
                error_details = COALESCE($6, error_details),
                retry_count = COALESCE($7, retry_count),
                assigned_engine_id = COALESCE($8, assigned_engine_id),
                lock_owner = COALESCE($9, lock_owner),
                updated_at = now()
            WHERE id = $1
            "#
        );

        sqlx::query(&query)
            .bind(id)
            .bind(workflow_status_name(new_status))
            .bind(&patch.output_data)
            .bind(&patch.context_data)
            .bind(&patch.error_message)
            .bind(&patch.error_details)
            .bind(patch.retry_count.map(|v| v as i32))
            .bind(patch.assigned_engine_id)
            .bind(&patch.lock_owner)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn find_by_assigned_engine(
        &self,
        engine_id: Uuid,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let status_names: Vec<&'static str> = statuses.iter().copied().map(workflow_status_name).collect();
        let rows = sqlx::query(
            "SELECT * FROM workflow_instances WHERE assigned_engine_id = $1 AND status = ANY($2)",
        )
        .bind(engine_id)
        .bind(&status_names[..])
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_instance).collect()
    }

    async fn find_by_mutex_key(
        &self,
        key: &str,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_instances WHERE mutex_key = $1 AND status = $2",
        )
        .bind(key)
        .bind(workflow_status_name(status))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_instance).collect()
    }

    async fn upsert_node_instance(&self, node: NodeInstance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_node_instances (id, workflow_instance_id, node_id, status, started_at, finished_at, output)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (workflow_instance_id, node_id) DO UPDATE
                SET status = EXCLUDED.status,
                    started_at = EXCLUDED.started_at,
                    finished_at = EXCLUDED.finished_at,
                    output = EXCLUDED.output
            "#,
        )
        .bind(node.id)
        .bind(node.workflow_instance_id)
        .bind(&node.node_id)
        .bind(node_status_name(node.status))
        .bind(node.started_at)
        .bind(node.finished_at)
        .bind(&node.output)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_node_instance(
        &self,
        workflow_instance_id: Uuid,
        node_id: &str,
    ) -> Result<Option<NodeInstance>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM workflow_node_instances WHERE workflow_instance_id = $1 AND node_id = $2",
        )
        .bind(workflow_instance_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(row_to_node).transpose()
    }

    async fn find_running_nodes_by_engine(
        &self,
        engine_id: Uuid,
    ) -> Result<Vec<(Uuid, String)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT n.workflow_instance_id, n.node_id
            FROM workflow_node_instances n
            JOIN workflow_instances w ON w.id = n.workflow_instance_id
            WHERE w.assigned_engine_id = $1 AND n.status = 'running'
            "#,
        )
        .bind(engine_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("workflow_instance_id"), r.get("node_id")))
            .collect())
    }

    #[instrument(skip(self, node_ids))]
    async fn reset_nodes(&self, node_ids: &[(Uuid, String)]) -> Result<(), StoreError> {
        if node_ids.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        for (workflow_instance_id, node_id) in node_ids {
            sqlx::query(
                r#"
                UPDATE workflow_node_instances
                SET status = 'pending', started_at = NULL
                WHERE workflow_instance_id = $1 AND node_id = $2 AND status = 'running'
                "#,
            )
            .bind(workflow_instance_id)
            .bind(node_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, instance_ids))]
    async fn transfer_instances(
        &self,
        instance_ids: &[Uuid],
        expected_engine_id: Uuid,
        to_engine_id: Uuid,
    ) -> Result<u64, StoreError> {
        if instance_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET assigned_engine_id = $2, lock_owner = NULL, updated_at = now()
            WHERE id = ANY($1) AND assigned_engine_id = $3
            "#,
        )
        .bind(instance_ids)
        .bind(to_engine_id)
        .bind(expected_engine_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn create_failover_event(&self, event: FailoverEvent) -> Result<(), StoreError> {
        let affected_json = serde_json::to_value(&event.affected_workflow_ids)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_failover_events
                (id, event_id, failed_engine_id, takeover_engine_id, failover_reason,
                 affected_workflows, status, failover_at, recovery_completed_at, updated_at)
            VALUES ($1, $1, $2, $3, $4, $5, $6, $7, $8, now())
            "#,
        )
        .bind(event.event_id)
        .bind(event.failed_engine_id)
        .bind(event.takeover_engine_id)
        .bind(&event.reason)
        .bind(&affected_json)
        .bind(event.status.to_string())
        .bind(event.failover_at)
        .bind(event.recovery_completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn update_failover_event(&self, event: FailoverEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE workflow_failover_events
            SET status = $2,
                recovery_completed_at = $3,
                takeover_engine_id = $4,
                failover_reason = $5,
                updated_at = now()
            WHERE event_id = $1
            "#,
        )
        .bind(event.event_id)
        .bind(event.status.to_string())
        .bind(event.recovery_completed_at)
        .bind(event.takeover_engine_id)
        .bind(&event.reason)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_failover_events(&self) -> Result<Vec<FailoverEvent>, StoreError> {
        let rows = sqlx::query("SELECT * FROM workflow_failover_events ORDER BY failover_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_failover).collect()
    }
}
