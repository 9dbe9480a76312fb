//! Definition Service (C8): versioned workflow definitions and "active
//! version" resolution.
//!
//! Grounded on `engine/registry.rs`'s registry-with-backing-store shape
//! and `persistence/postgres.rs`'s create/read idioms. Read-only to the
//! Workflow Engine (`crate::engine`); writers toggling `is_active` must
//! hold the lock `def:<name>` (SPEC_FULL.md §4.8) so at most one version
//! per name is ever active.

mod memory;
mod postgres;

pub use memory::InMemoryDefinitionService;
pub use postgres::PostgresDefinitionService;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::WorkflowDefinition;
use crate::lock::{LockError, LockService};

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("definition not found: {0}")]
    NotFound(String),
    #[error("duplicate (name, version): {0} v{1}")]
    DuplicateVersion(String, i32),
    #[error("database error: {0}")]
    Database(String),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
}

const DEFINITION_LOCK_TTL: Duration = Duration::from_secs(30);

#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn create(&self, definition: WorkflowDefinition) -> Result<(), DefinitionError>;

    async fn get_active(&self, name: &str) -> Result<Option<WorkflowDefinition>, DefinitionError>;

    async fn get_version(
        &self,
        name: &str,
        version: i32,
    ) -> Result<Option<WorkflowDefinition>, DefinitionError>;

    /// Looked up by the Workflow Engine when resuming an instance, which
    /// only has `definition_id` on hand (not the `(name, version)` pair).
    async fn get_by_id(&self, id: uuid::Uuid) -> Result<Option<WorkflowDefinition>, DefinitionError>;

    /// Clears `is_active` on every other version of `name` and sets it on
    /// `version`, as a single storage operation. Callers must hold
    /// `def:<name>` before calling this (enforced by
    /// [`DefinitionService::activate`], not by the store itself).
    async fn set_active_version(&self, name: &str, version: i32) -> Result<(), DefinitionError>;
}

/// Thin orchestrator over a [`DefinitionStore`] plus the lock it needs for
/// safe activation toggles. Mirrors SPEC_FULL.md §9's "one orchestrator
/// over narrow storage interfaces" redesign note.
pub struct DefinitionService {
    store: Arc<dyn DefinitionStore>,
    locks: Arc<dyn LockService>,
}

impl DefinitionService {
    pub fn new(store: Arc<dyn DefinitionStore>, locks: Arc<dyn LockService>) -> Self {
        Self { store, locks }
    }

    pub async fn create(&self, definition: WorkflowDefinition) -> Result<(), DefinitionError> {
        self.store.create(definition).await
    }

    pub async fn get(&self, name: &str) -> Result<WorkflowDefinition, DefinitionError> {
        self.store
            .get_active(name)
            .await?
            .ok_or_else(|| DefinitionError::NotFound(name.to_string()))
    }

    pub async fn get_version(
        &self,
        name: &str,
        version: i32,
    ) -> Result<WorkflowDefinition, DefinitionError> {
        self.store
            .get_version(name, version)
            .await?
            .ok_or_else(|| DefinitionError::NotFound(format!("{name} v{version}")))
    }

    pub async fn get_by_id(&self, id: uuid::Uuid) -> Result<WorkflowDefinition, DefinitionError> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| DefinitionError::NotFound(id.to_string()))
    }

    /// Toggle the active version for `name`, serialized through
    /// `def:<name>` so no two writers can race two different versions
    /// into "active" at once.
    pub async fn activate(
        &self,
        name: &str,
        version: i32,
        owner_id: &str,
    ) -> Result<(), DefinitionError> {
        let key = format!("def:{name}");
        let acquired = self
            .locks
            .acquire(&key, DEFINITION_LOCK_TTL, owner_id)
            .await?;
        if !acquired {
            return Err(DefinitionError::Database(format!(
                "could not acquire `{key}` to activate version {version}"
            )));
        }
        let result = self.store.set_active_version(name, version).await;
        self.locks.release(&key, owner_id).await?;
        result
    }
}
