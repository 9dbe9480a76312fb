use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use super::{EngineRegistry, RegistryError};
use crate::domain::{EngineInstance, EngineStatus, LoadInfo};

#[derive(Clone)]
pub struct PostgresEngineRegistry {
    pool: PgPool,
}

impl PostgresEngineRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_engine(row: sqlx::postgres::PgRow) -> Result<EngineInstance, RegistryError> {
    let status_str: String = row.get("status");
    let status = match status_str.as_str() {
        "active" => EngineStatus::Active,
        "inactive" => EngineStatus::Inactive,
        "maintenance" => EngineStatus::Maintenance,
        other => {
            return Err(RegistryError::Database(format!(
                "unknown engine status `{other}`"
            )))
        }
    };
    let load_json: serde_json::Value = row.get("load_info");
    let load_info: LoadInfo =
        serde_json::from_value(load_json).map_err(|e| RegistryError::Database(e.to_string()))?;
    let executors_json: serde_json::Value = row.get("supported_executors");
    let supported_executors: Vec<String> = serde_json::from_value(executors_json)
        .map_err(|e| RegistryError::Database(e.to_string()))?;

    Ok(EngineInstance {
        instance_id: row.get("instance_id"),
        hostname: row.get("hostname"),
        process_id: row.get::<i32, _>("process_id") as u32,
        status,
        load_info,
        supported_executors,
        started_at: row.get("started_at"),
        last_heartbeat: row.get("last_heartbeat"),
    })
}

#[async_trait]
impl EngineRegistry for PostgresEngineRegistry {
    #[instrument(skip(self, engine), fields(instance_id = %engine.instance_id))]
    async fn register(&self, engine: EngineInstance) -> Result<(), RegistryError> {
        let load_json = serde_json::to_value(engine.load_info)
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        let executors_json = serde_json::to_value(&engine.supported_executors)
            .map_err(|e| RegistryError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_engine_instances
                (instance_id, hostname, process_id, status, load_info, supported_executors, started_at, last_heartbeat, updated_at)
            VALUES ($1, $2, $3, 'active', $4, $5, now(), now(), now())
            ON CONFLICT (instance_id) DO UPDATE
                SET status = 'active',
                    hostname = EXCLUDED.hostname,
                    process_id = EXCLUDED.process_id,
                    load_info = EXCLUDED.load_info,
                    supported_executors = EXCLUDED.supported_executors,
                    last_heartbeat = now(),
                    updated_at = now()
            "#,
        )
        .bind(engine.instance_id)
        .bind(&engine.hostname)
        .bind(engine.process_id as i32)
        .bind(&load_json)
        .bind(&executors_json)
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::Database(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self, load))]
    async fn heartbeat(&self, instance_id: Uuid, load: LoadInfo) -> Result<bool, RegistryError> {
        let load_json =
            serde_json::to_value(load).map_err(|e| RegistryError::Database(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_engine_instances
            SET last_heartbeat = now(), load_info = $2, updated_at = now()
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id)
        .bind(&load_json)
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_active(
        &self,
        liveness_window: chrono::Duration,
    ) -> Result<Vec<EngineInstance>, RegistryError> {
        let seconds = liveness_window.num_seconds();
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_engine_instances
            WHERE status = 'active' AND last_heartbeat >= now() - ($1 || ' seconds')::interval
            "#,
        )
        .bind(seconds.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RegistryError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_engine).collect()
    }

    async fn list_stale(
        &self,
        threshold: chrono::Duration,
    ) -> Result<Vec<EngineInstance>, RegistryError> {
        let seconds = threshold.num_seconds();
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_engine_instances
            WHERE status = 'active' AND last_heartbeat < now() - ($1 || ' seconds')::interval
            "#,
        )
        .bind(seconds.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RegistryError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_engine).collect()
    }

    async fn mark_inactive(&self, instance_id: Uuid) -> Result<(), RegistryError> {
        sqlx::query(
            "UPDATE workflow_engine_instances SET status = 'inactive', updated_at = now() WHERE instance_id = $1",
        )
        .bind(instance_id)
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn unregister(&self, instance_id: Uuid) -> Result<(), RegistryError> {
        sqlx::query("DELETE FROM workflow_engine_instances WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, instance_id: Uuid) -> Result<Option<EngineInstance>, RegistryError> {
        let row = sqlx::query("SELECT * FROM workflow_engine_instances WHERE instance_id = $1")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RegistryError::Database(e.to_string()))?;

        row.map(row_to_engine).transpose()
    }
}
