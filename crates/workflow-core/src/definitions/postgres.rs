use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{DefinitionError, DefinitionStore};
use crate::domain::WorkflowDefinition;

#[derive(Clone)]
pub struct PostgresDefinitionService {
    pool: PgPool,
}

impl PostgresDefinitionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_definition(row: sqlx::postgres::PgRow) -> Result<WorkflowDefinition, DefinitionError> {
    let definition_json: serde_json::Value = row.get("definition_json");
    let mut definition: WorkflowDefinition = serde_json::from_value(definition_json)
        .map_err(|e| DefinitionError::Database(e.to_string()))?;
    definition.id = row.get("id");
    definition.name = row.get("name");
    definition.version = row.get("version");
    definition.is_active = row.get("is_active");
    definition.created_at = row.get("created_at");
    Ok(definition)
}

#[async_trait]
impl DefinitionStore for PostgresDefinitionService {
    async fn create(&self, definition: WorkflowDefinition) -> Result<(), DefinitionError> {
        let definition_json =
            serde_json::to_value(&definition).map_err(|e| DefinitionError::Database(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO workflow_definitions (id, name, version, definition_json, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name, version) DO NOTHING
            "#,
        )
        .bind(definition.id)
        .bind(&definition.name)
        .bind(definition.version)
        .bind(&definition_json)
        .bind(definition.is_active)
        .bind(definition.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DefinitionError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(DefinitionError::DuplicateVersion(
                definition.name,
                definition.version,
            ));
        }
        Ok(())
    }

    async fn get_active(&self, name: &str) -> Result<Option<WorkflowDefinition>, DefinitionError> {
        let row = sqlx::query(
            "SELECT * FROM workflow_definitions WHERE name = $1 AND is_active LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DefinitionError::Database(e.to_string()))?;

        row.map(row_to_definition).transpose()
    }

    async fn get_version(
        &self,
        name: &str,
        version: i32,
    ) -> Result<Option<WorkflowDefinition>, DefinitionError> {
        let row = sqlx::query("SELECT * FROM workflow_definitions WHERE name = $1 AND version = $2")
            .bind(name)
            .bind(version)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DefinitionError::Database(e.to_string()))?;

        row.map(row_to_definition).transpose()
    }

    async fn get_by_id(&self, id: uuid::Uuid) -> Result<Option<WorkflowDefinition>, DefinitionError> {
        let row = sqlx::query("SELECT * FROM workflow_definitions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DefinitionError::Database(e.to_string()))?;

        row.map(row_to_definition).transpose()
    }

    async fn set_active_version(&self, name: &str, version: i32) -> Result<(), DefinitionError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DefinitionError::Database(e.to_string()))?;

        sqlx::query("UPDATE workflow_definitions SET is_active = false WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| DefinitionError::Database(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE workflow_definitions SET is_active = true WHERE name = $1 AND version = $2",
        )
        .bind(name)
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(|e| DefinitionError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(DefinitionError::NotFound(format!("{name} v{version}")));
        }

        tx.commit()
            .await
            .map_err(|e| DefinitionError::Database(e.to_string()))?;
        Ok(())
    }
}
