//! Engine Registry (C2): cluster membership, heartbeat, liveness.
//!
//! Grounded on `worker/pool.rs`'s `WorkerPoolConfig` heartbeat cadence
//! fields and `persistence/store.rs`'s `WorkerInfo`/`WorkerFilter` shape,
//! generalized from "task worker" to "engine instance" per SPEC_FULL.md §3
//! and §4.2.

mod memory;
mod postgres;

pub use memory::InMemoryEngineRegistry;
pub use postgres::PostgresEngineRegistry;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{EngineInstance, LoadInfo};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("engine already registered: {0}")]
    AlreadyRegistered(String),
    #[error("engine not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(String),
}

/// Engine membership contract (SPEC_FULL.md §4.2).
#[async_trait]
pub trait EngineRegistry: Send + Sync {
    /// Upsert the row with `status = active` and `last_heartbeat = now()`.
    async fn register(&self, engine: EngineInstance) -> Result<(), RegistryError>;

    /// Bump `last_heartbeat` and update `load_info`. Returns `false` (not
    /// an error) if no row exists; the caller must then re-register.
    async fn heartbeat(&self, instance_id: Uuid, load: LoadInfo) -> Result<bool, RegistryError>;

    /// `status = active AND last_heartbeat` within `liveness_window`.
    async fn list_active(
        &self,
        liveness_window: chrono::Duration,
    ) -> Result<Vec<EngineInstance>, RegistryError>;

    /// `status = active AND last_heartbeat < now - threshold`.
    async fn list_stale(
        &self,
        threshold: chrono::Duration,
    ) -> Result<Vec<EngineInstance>, RegistryError>;

    async fn mark_inactive(&self, instance_id: Uuid) -> Result<(), RegistryError>;

    async fn unregister(&self, instance_id: Uuid) -> Result<(), RegistryError>;

    async fn get(&self, instance_id: Uuid) -> Result<Option<EngineInstance>, RegistryError>;
}
