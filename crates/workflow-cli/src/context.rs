// Wires a CLI invocation's Postgres pool into the same component set a
// running engine process uses, so the CLI exercises the real store
// implementations rather than a parallel read path.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use workflow_core::prelude::*;

pub struct Context {
    pub store: Arc<dyn InstanceStore>,
    pub locks: Arc<dyn LockService>,
    pub registry: Arc<dyn EngineRegistry>,
    pub definitions: Arc<DefinitionService>,
    pub engine: Arc<WorkflowEngine>,
    pub definition_store: Arc<dyn DefinitionStore>,
}

impl Context {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool: PgPool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let store: Arc<dyn InstanceStore> = Arc::new(PostgresInstanceStore::new(pool.clone()));
        let locks: Arc<dyn LockService> = Arc::new(PostgresLockService::new(pool.clone()));
        let registry: Arc<dyn EngineRegistry> = Arc::new(PostgresEngineRegistry::new(pool.clone()));
        let definition_store: Arc<dyn DefinitionStore> =
            Arc::new(PostgresDefinitionService::new(pool));
        let definitions = Arc::new(DefinitionService::new(definition_store.clone(), locks.clone()));

        let executors = Arc::new(ExecutorRegistry::new());
        // A standalone CLI process has no business-logic executors of its
        // own; `start`/`resume` here can only drive definitions composed
        // entirely of `noop` tasks (smoke-testing a definition's shape).
        // Real executor-bearing runs are driven by the engine daemon
        // process that registered them at startup.
        executors.register("noop", Arc::new(NoopExecutor));

        let engine = Arc::new(WorkflowEngine::new(
            uuid::Uuid::now_v7(),
            store.clone(),
            locks.clone(),
            executors,
            EngineConfig::from_env()?,
        ));

        Ok(Self {
            store,
            locks,
            registry,
            definitions,
            engine,
            definition_store,
        })
    }
}
