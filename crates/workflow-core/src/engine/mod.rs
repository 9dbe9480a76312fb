//! Workflow Engine (C7): validates definitions, drives instances through
//! their node tree to completion, and owns the run-level retry loop.
//!
//! Replaces the teacher's event-sourced `WorkflowExecutor<S>` (which
//! replayed a `Workflow` trait's `Event`/`Action` stream) with direct
//! interpretation of a `Node` tree via `nodes::NodeRunner`. What survives
//! from `engine/executor.rs` is the shape of the public contract
//! (start/pause/resume/cancel/status) and the idea of a single owning
//! engine identity driving retries; `reliability/retry.rs`'s backoff idea
//! survives in `engine::retry`, simplified to one fixed formula.

mod nodes;
pub mod retry;

use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{WorkflowDefinition, WorkflowInstance, WorkflowStatus};
use crate::error::EngineError;
use crate::executor::ExecutorRegistry;
use crate::lock::LockService;
use crate::store::{InstanceStore, StatusPatch};
use nodes::NodeRunner;

const WORKFLOW_LOCK_PREFIX: &str = "wf:";

/// Owns one engine's view of instance execution. Multiple `WorkflowEngine`
/// values (one per process) share the same backing store/lock table;
/// `engine_id` is what the Scheduler (`crate::scheduler`) uses to tell
/// them apart for ownership and failover.
pub struct WorkflowEngine {
    engine_id: Uuid,
    store: Arc<dyn InstanceStore>,
    locks: Arc<dyn LockService>,
    executors: Arc<ExecutorRegistry>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        engine_id: Uuid,
        store: Arc<dyn InstanceStore>,
        locks: Arc<dyn LockService>,
        executors: Arc<ExecutorRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine_id,
            store,
            locks,
            executors,
            config,
        }
    }

    pub fn engine_id(&self) -> Uuid {
        self.engine_id
    }

    fn runner(&self) -> NodeRunner {
        NodeRunner {
            store: self.store.clone(),
            executors: self.executors.clone(),
            config: self.config.clone(),
        }
    }

    /// Structural checks a definition must pass before any instance of it
    /// can be started: unique node ids, every `Task.executor_name`
    /// resolvable, every required input present.
    pub fn validate(
        &self,
        definition: &WorkflowDefinition,
        inputs: &serde_json::Value,
    ) -> Result<(), EngineError> {
        if definition.nodes.is_empty() {
            return Err(EngineError::Validation(
                "definition must have at least one node".into(),
            ));
        }

        let ids = definition.all_node_ids();
        let mut seen = std::collections::HashSet::new();
        for id in &ids {
            if !seen.insert(*id) {
                return Err(EngineError::Validation(format!("duplicate node id `{id}`")));
            }
        }

        for node in all_tasks(&definition.nodes) {
            if let crate::domain::Node::Task { executor_name, .. } = node {
                if !self.executors.contains(executor_name) {
                    return Err(EngineError::Validation(format!(
                        "unknown executor `{executor_name}`"
                    )));
                }
            }
        }

        for input in &definition.inputs {
            if input.required && inputs.get(&input.name).is_none() {
                return Err(EngineError::Validation(format!(
                    "missing required input `{}`",
                    input.name
                )));
            }
        }

        Ok(())
    }

    /// Create an instance and drive it to its first suspension point
    /// (completion, failure, or an externally requested pause/cancel).
    #[instrument(skip(self, definition, inputs), fields(definition = %definition.name))]
    pub async fn start(
        &self,
        definition: &WorkflowDefinition,
        inputs: serde_json::Value,
    ) -> Result<WorkflowInstance, EngineError> {
        self.start_with_mutex_key(definition, inputs, None).await
    }

    /// Same as [`Self::start`], but stamps `mutex_key` on the instance row
    /// at creation so `InstanceStore::find_by_mutex_key` can find it.
    /// Used by [`crate::mutex::MutexService`] (SPEC_FULL.md §4.4 step 3).
    pub async fn start_with_mutex_key(
        &self,
        definition: &WorkflowDefinition,
        inputs: serde_json::Value,
        mutex_key: Option<String>,
    ) -> Result<WorkflowInstance, EngineError> {
        self.validate(definition, &inputs)?;

        let now = Utc::now();
        let instance = WorkflowInstance {
            id: Uuid::now_v7(),
            definition_id: definition.id,
            name: definition.name.clone(),
            status: WorkflowStatus::Pending,
            input_data: inputs,
            output_data: serde_json::Value::Null,
            context_data: serde_json::json!({}),
            started_at: None,
            completed_at: None,
            paused_at: None,
            error_message: None,
            error_details: None,
            retry_count: 0,
            max_retries: definition.config.retry_policy.max_retries,
            priority: definition.config.priority,
            scheduled_at: now,
            business_key: None,
            mutex_key,
            assigned_engine_id: None,
            lock_owner: None,
            lock_acquired_at: None,
            last_heartbeat: None,
            created_at: now,
            updated_at: now,
            created_by: None,
        };
        self.store.create_instance(instance.clone()).await?;

        self.run(definition, instance.id).await
    }

    pub async fn pause(&self, instance_id: Uuid) -> Result<(), EngineError> {
        self.store
            .update_status(
                instance_id,
                WorkflowStatus::Paused,
                StatusPatch {
                    paused_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Flip `paused -> running` and keep driving the node tree. Already
    /// `Completed` tasks are skipped by `NodeRunner` via their cached
    /// `NodeInstance` rows, so resuming re-enters exactly where it left
    /// off without redoing finished work.
    pub async fn resume(
        &self,
        definitions: &dyn crate::definitions::DefinitionStore,
        instance_id: Uuid,
    ) -> Result<WorkflowInstance, EngineError> {
        let instance = self.store.get_instance(instance_id).await?;
        let definition = definitions
            .get_by_id(instance.definition_id)
            .await
            .map_err(|e| EngineError::TransientStore(e.to_string()))?
            .ok_or_else(|| EngineError::NotFound(instance.definition_id.to_string()))?;

        self.store
            .update_status(instance_id, WorkflowStatus::Running, StatusPatch::default())
            .await?;

        self.run(&definition, instance_id).await
    }

    pub async fn cancel(&self, instance_id: Uuid) -> Result<(), EngineError> {
        self.store
            .update_status(instance_id, WorkflowStatus::Cancelled, StatusPatch::default())
            .await?;
        Ok(())
    }

    pub async fn status(&self, instance_id: Uuid) -> Result<WorkflowStatus, EngineError> {
        Ok(self.store.get_instance(instance_id).await?.status)
    }

    /// The run-level retry loop: `Pending -> Running`, interpret the node
    /// tree, and on a retryable failure go back to `Pending` after the
    /// SPEC_FULL.md §4.7 backoff delay, reusing the same instance id.
    async fn run(
        &self,
        definition: &WorkflowDefinition,
        instance_id: Uuid,
    ) -> Result<WorkflowInstance, EngineError> {
        let runner = self.runner();
        let lock_key = format!("{WORKFLOW_LOCK_PREFIX}{instance_id}");
        let owner_id = self.engine_id.to_string();

        loop {
            let instance = self.store.get_instance(instance_id).await?;
            if instance.status.is_terminal() || instance.status == WorkflowStatus::Paused {
                return Ok(instance);
            }

            if !self
                .locks
                .acquire(&lock_key, self.config.instance_lock_ttl(), &owner_id)
                .await?
            {
                return Err(EngineError::Conflict(format!(
                    "instance {instance_id} is locked by another engine"
                )));
            }

            self.store
                .update_status(
                    instance_id,
                    WorkflowStatus::Running,
                    StatusPatch {
                        assigned_engine_id: Some(self.engine_id),
                        lock_owner: Some(owner_id.clone()),
                        ..Default::default()
                    },
                )
                .await?;

            let vars = build_initial_vars(&instance);
            let outcome = runner.execute_nodes(instance_id, &definition.nodes, vars).await;

            self.locks.release(&lock_key, &owner_id).await.ok();

            let current = self.store.get_instance(instance_id).await?;
            if current.status != WorkflowStatus::Running {
                // Paused or cancelled mid-run; leave status as the caller set it.
                return Ok(current);
            }

            match outcome {
                Ok(final_vars) => {
                    self.store
                        .update_status(
                            instance_id,
                            WorkflowStatus::Completed,
                            StatusPatch {
                                output_data: Some(final_vars),
                                ..Default::default()
                            },
                        )
                        .await?;
                    return Ok(self.store.get_instance(instance_id).await?);
                }
                Err(e) if e.retryable() && current.retry_count < current.max_retries => {
                    let retry_count = current.retry_count + 1;
                    warn!(instance = %instance_id, retry_count, error = %e, "retrying workflow instance");
                    self.store
                        .update_status(
                            instance_id,
                            WorkflowStatus::Pending,
                            StatusPatch {
                                retry_count: Some(retry_count),
                                error_message: Some(e.to_string()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    sleep(retry::backoff_delay(retry_count)).await;
                }
                Err(e) => {
                    self.store
                        .update_status(
                            instance_id,
                            WorkflowStatus::Failed,
                            StatusPatch {
                                error_message: Some(e.to_string()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    info!(instance = %instance_id, error = %e, "workflow instance failed");
                    return Ok(self.store.get_instance(instance_id).await?);
                }
            }
        }
    }
}

/// Seeds the variable map Task inputs and guard/condition expressions are
/// evaluated against: the instance's declared input fields, its
/// `context_data` under `"context"`, and empty `nodes`/`branches`/`loops`
/// buckets (SPEC_FULL.md §4.7).
fn build_initial_vars(instance: &WorkflowInstance) -> serde_json::Value {
    let mut vars = instance.input_data.clone();
    if !vars.is_object() {
        vars = serde_json::json!({});
    }
    if let serde_json::Value::Object(map) = &mut vars {
        map.insert("context".into(), instance.context_data.clone());
        map.entry("nodes").or_insert_with(|| serde_json::json!({}));
        map.entry("branches").or_insert_with(|| serde_json::json!({}));
        map.entry("loops").or_insert_with(|| serde_json::json!({}));
    }
    vars
}

fn all_tasks(nodes: &[crate::domain::Node]) -> Vec<&crate::domain::Node> {
    use crate::domain::Node;
    let mut out = Vec::new();
    for node in nodes {
        match node {
            Node::Task { .. } => out.push(node),
            Node::Parallel { branches, .. } => {
                for branch in branches {
                    out.extend(all_tasks(branch));
                }
            }
            Node::Condition {
                true_branch,
                false_branch,
                ..
            } => {
                out.extend(all_tasks(true_branch));
                out.extend(all_tasks(false_branch));
            }
            Node::Loop { body, .. } => out.extend(all_tasks(body)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DefinitionConfig, InputSpec, LoopKind, Node};
    use crate::executor::{ExecutionContext, Executor, ExecutorError, ExecutorOutput, NoopExecutor};
    use crate::lock::InMemoryLockService;
    use crate::store::InMemoryInstanceStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    fn definition(nodes: Vec<Node>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "test".into(),
            version: 1,
            nodes,
            inputs: vec![],
            outputs: vec![],
            config: DefinitionConfig::default(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn test_engine(executors: Arc<ExecutorRegistry>) -> WorkflowEngine {
        WorkflowEngine::new(
            Uuid::now_v7(),
            Arc::new(InMemoryInstanceStore::new()),
            Arc::new(InMemoryLockService::new()),
            executors,
            EngineConfig::default(),
        )
    }

    struct Echo;
    #[async_trait]
    impl Executor for Echo {
        async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutorOutput, ExecutorError> {
            Ok(ExecutorOutput {
                data: ctx.config.clone(),
            })
        }
    }

    #[tokio::test]
    async fn happy_path_task_completes() {
        let registry = Arc::new(ExecutorRegistry::new());
        registry.register("echo", Arc::new(Echo));
        let engine = test_engine(registry);
        let def = definition(vec![Node::Task {
            id: "n1".into(),
            executor_name: "echo".into(),
            config: json!("pong"),
            guard_expr: None,
        }]);

        let instance = engine.start(&def, json!({})).await.unwrap();
        assert_eq!(instance.status, WorkflowStatus::Completed);
        assert_eq!(instance.output_data["nodes"]["n1"]["output"], json!("pong"));
    }

    #[tokio::test]
    async fn condition_false_branch_runs_else_arm() {
        let registry = Arc::new(ExecutorRegistry::new());
        registry.register("echo", Arc::new(Echo));
        let engine = test_engine(registry);
        let def = definition(vec![Node::Condition {
            id: "c1".into(),
            expr: "x > 10".into(),
            true_branch: vec![Node::Task {
                id: "yes".into(),
                executor_name: "echo".into(),
                config: json!("yes"),
                guard_expr: None,
            }],
            false_branch: vec![Node::Task {
                id: "no".into(),
                executor_name: "echo".into(),
                config: json!("no"),
                guard_expr: None,
            }],
            guard_expr: None,
        }]);

        let instance = engine.start(&def, json!({ "x": 3 })).await.unwrap();
        assert_eq!(instance.status, WorkflowStatus::Completed);
        assert_eq!(instance.output_data["nodes"]["no"]["output"], json!("no"));
        assert!(instance.output_data["nodes"].get("yes").is_none());
    }

    #[tokio::test]
    async fn parallel_merges_branch_outputs() {
        let registry = Arc::new(ExecutorRegistry::new());
        registry.register("echo", Arc::new(Echo));
        let engine = test_engine(registry);
        let def = definition(vec![Node::Parallel {
            id: "p1".into(),
            branches: vec![
                vec![Node::Task {
                    id: "a".into(),
                    executor_name: "echo".into(),
                    config: json!({ "a": 1 }),
                    guard_expr: None,
                }],
                vec![Node::Task {
                    id: "b".into(),
                    executor_name: "echo".into(),
                    config: json!({ "b": 2 }),
                    guard_expr: None,
                }],
            ],
            guard_expr: None,
        }]);

        let instance = engine.start(&def, json!({})).await.unwrap();
        assert_eq!(instance.status, WorkflowStatus::Completed);
        assert_eq!(
            instance.output_data["branches"]["p1"]["0"]["nodes"]["a"]["output"],
            json!({ "a": 1 })
        );
        assert_eq!(
            instance.output_data["branches"]["p1"]["1"]["nodes"]["b"]["output"],
            json!({ "b": 2 })
        );
    }

    #[tokio::test]
    async fn loop_hits_max_iterations_and_fails() {
        let registry = Arc::new(ExecutorRegistry::new());
        let engine = test_engine(registry);
        let def = definition(vec![Node::Loop {
            id: "l1".into(),
            kind: LoopKind::While {
                predicate: "true".into(),
            },
            body: vec![],
            max_iterations: Some(3),
            guard_expr: None,
        }]);

        // Default retry policy (max_retries = 3) is left untouched: the
        // hard-cap error must be non-retryable on its own, not merely
        // masked by disabling retries.
        let instance = engine.start(&def, json!({})).await.unwrap();
        assert_eq!(instance.status, WorkflowStatus::Failed);
        assert_eq!(instance.retry_count, 0);
        assert!(instance
            .error_message
            .unwrap()
            .contains("max iterations"));
        assert_eq!(instance.output_data["loops"]["l1"]["count"], json!(3));
    }

    #[tokio::test]
    async fn required_input_missing_rejected_before_persistence() {
        let registry = Arc::new(ExecutorRegistry::new());
        registry.register("noop", Arc::new(NoopExecutor));
        let engine = test_engine(registry);
        let mut def = definition(vec![Node::Task {
            id: "n1".into(),
            executor_name: "noop".into(),
            config: Value::Null,
            guard_expr: None,
        }]);
        def.inputs.push(InputSpec {
            name: "required_field".into(),
            required: true,
        });

        let err = engine.start(&def, json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn cancel_stops_loop_before_next_iteration() {
        // Verifies `cancel` flips status to a terminal state the run loop
        // respects; a direct exercise of mid-run cancellation would need a
        // slow executor and is covered at the scheduler/property-test level.
        let registry = Arc::new(ExecutorRegistry::new());
        let engine = test_engine(registry);
        let instance_id = Uuid::now_v7();
        engine
            .store
            .create_instance(WorkflowInstance {
                id: instance_id,
                definition_id: Uuid::now_v7(),
                name: "x".into(),
                status: WorkflowStatus::Running,
                input_data: json!({}),
                output_data: Value::Null,
                context_data: json!({}),
                started_at: Some(Utc::now()),
                completed_at: None,
                paused_at: None,
                error_message: None,
                error_details: None,
                retry_count: 0,
                max_retries: 3,
                priority: 0,
                scheduled_at: Utc::now(),
                business_key: None,
                mutex_key: None,
                assigned_engine_id: Some(engine.engine_id()),
                lock_owner: None,
                lock_acquired_at: None,
                last_heartbeat: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                created_by: None,
            })
            .await
            .unwrap();

        engine.cancel(instance_id).await.unwrap();
        assert_eq!(engine.status(instance_id).await.unwrap(), WorkflowStatus::Cancelled);
    }
}
