//! Executor Registry (C6): lookup of pluggable task executors by name.
//!
//! Grounded on `engine/registry.rs`'s `AnyWorkflow` type-erasure pattern
//! (a trait object behind a name-keyed map) and `activity/definition.rs`'s
//! `Activity` trait for the executor contract itself. Unlike the teacher's
//! `Activity`, which is generic over typed `Input`/`Output` and gets
//! wrapped per-instantiation, executors here are registered directly as
//! `dyn Executor` trait objects: SPEC_FULL.md §4.6 describes them as
//! "pure value objects" looked up by a single flat name, with no generic
//! input/output typing at the registry boundary (that typing lives inside
//! each executor's own `config`/`ctx.inputs` handling).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("no executor registered for `{0}`")]
    NotFound(String),
    #[error("retryable executor failure: {0}")]
    Retryable(String),
    #[error("non-retryable executor failure: {0}")]
    NonRetryable(String),
}

/// Execution context handed to an executor for a single Task node
/// (SPEC_FULL.md §4.7).
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: String,
    pub workflow_instance_id: uuid::Uuid,
    pub config: Value,
    pub inputs: Value,
    pub context: Value,
}

/// Result payload an executor reports on success.
#[derive(Debug, Clone)]
pub struct ExecutorOutput {
    pub data: Value,
}

/// A named, pluggable unit performing a Task node's side effect
/// (SPEC_FULL.md §4.6). Implementors are "pure value objects": no
/// interior registry lookups, no global state.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutorOutput, ExecutorError>;

    /// Optional liveness/readiness probe; default is always-healthy.
    async fn health_check(&self) -> Result<(), ExecutorError> {
        Ok(())
    }
}

/// Append-only-at-runtime registry populated at process start.
/// Tie-break on duplicate registration: last write wins, with a warning
/// (SPEC_FULL.md §4.6) — mirrors `engine/registry.rs`'s
/// `WorkflowRegistry::register`, which silently overwrote; this registry
/// makes the overwrite audible via `tracing::warn`.
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn Executor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>, executor: Arc<dyn Executor>) {
        let name = name.into();
        let mut executors = self.executors.write();
        if executors.contains_key(&name) {
            warn!(executor = %name, "overwriting previously registered executor");
        }
        executors.insert(name, executor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.executors.read().keys().cloned().collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A trivial built-in executor useful for tests and smoke-checking a
/// deployment: always succeeds, echoing `config` back as `data`. Mirrors
/// the `noop` executor referenced throughout SPEC_FULL.md §8's scenarios.
pub struct NoopExecutor;

#[async_trait]
impl Executor for NoopExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutorOutput, ExecutorError> {
        Ok(ExecutorOutput {
            data: ctx.config.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_registration_wins() {
        let registry = ExecutorRegistry::new();
        registry.register("noop", Arc::new(NoopExecutor));
        struct Other;
        #[async_trait]
        impl Executor for Other {
            async fn execute(&self, _ctx: &ExecutionContext) -> Result<ExecutorOutput, ExecutorError> {
                Ok(ExecutorOutput {
                    data: Value::String("other".into()),
                })
            }
        }
        registry.register("noop", Arc::new(Other));
        assert!(registry.get("noop").is_some());
        assert_eq!(registry.names(), vec!["noop".to_string()]);
    }

    #[tokio::test]
    async fn noop_echoes_config() {
        let executor = NoopExecutor;
        let ctx = ExecutionContext {
            task_id: "t1".into(),
            workflow_instance_id: uuid::Uuid::now_v7(),
            config: serde_json::json!("pong"),
            inputs: Value::Null,
            context: Value::Null,
        };
        let out = executor.execute(&ctx).await.unwrap();
        assert_eq!(out.data, serde_json::json!("pong"));
    }

    #[test]
    fn unknown_executor_is_not_found() {
        let registry = ExecutorRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(!registry.contains("missing"));
    }
}
