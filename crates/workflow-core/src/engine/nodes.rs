//! Recursive node interpretation (SPEC_FULL.md §4.7): the teacher's
//! `engine/executor.rs` drove a `WorkflowExecutor<S>` through event replay
//! against an opaque `Workflow` trait; this module replaces that replay
//! with direct, resumable recursion over a concrete `Node` tree. A node
//! whose `NodeInstance` is already `Completed` is treated as cached and
//! its stored `output` is merged back into the variable map without
//! re-invoking anything — this is what makes `pause`/`resume` and
//! scheduler failover resumption both fall out of the same code path.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{LoopKind, Node, NodeInstance, NodeStatus, WorkflowStatus};
use crate::error::EngineError;
use crate::executor::{ExecutionContext, ExecutorRegistry};
use crate::expr;
use crate::store::InstanceStore;

/// Everything node execution needs, bundled so `execute_nodes` doesn't
/// carry six separate parameters through every recursive call.
pub struct NodeRunner {
    pub store: Arc<dyn InstanceStore>,
    pub executors: Arc<ExecutorRegistry>,
    pub config: EngineConfig,
}

impl NodeRunner {
    /// Whether the instance is still eligible to keep executing. Checked
    /// at every suspension point named in SPEC_FULL.md §5: between nodes,
    /// before every loop iteration, before waiting on a parallel branch
    /// set.
    async fn still_running(&self, instance_id: Uuid) -> Result<bool, EngineError> {
        let instance = self.store.get_instance(instance_id).await?;
        Ok(instance.status == WorkflowStatus::Running)
    }

    /// Run a sibling sequence in definition order, stopping cooperatively
    /// the moment the instance is observed non-running.
    pub fn execute_nodes<'a>(
        &'a self,
        instance_id: Uuid,
        nodes: &'a [Node],
        mut vars: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            for node in nodes {
                if !self.still_running(instance_id).await? {
                    return Ok(vars);
                }
                vars = self.execute_node(instance_id, node, vars).await?;
            }
            Ok(vars)
        })
    }

    #[instrument(skip(self, vars), fields(node_id = %node.id()))]
    fn execute_node<'a>(
        &'a self,
        instance_id: Uuid,
        node: &'a Node,
        vars: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(existing) = self.store.get_node_instance(instance_id, node.id()).await? {
                match existing.status {
                    NodeStatus::Completed => {
                        return Ok(merge_cached_output(vars, node.id(), existing.output));
                    }
                    NodeStatus::Skipped => return Ok(vars),
                    _ => {}
                }
            }

            if let Some(guard) = node.guard_expr() {
                if !expr::eval_bool(guard, &vars)? {
                    self.mark_node(instance_id, node.id(), NodeStatus::Skipped, None)
                        .await?;
                    return Ok(vars);
                }
            }

            match node {
                Node::Task {
                    id,
                    executor_name,
                    config,
                    ..
                } => self.run_task(instance_id, id, executor_name, config, vars).await,
                Node::Condition {
                    id,
                    expr: guard,
                    true_branch,
                    false_branch,
                    ..
                } => {
                    self.run_condition(instance_id, id, guard, true_branch, false_branch, vars)
                        .await
                }
                Node::Parallel { id, branches, .. } => {
                    self.run_parallel(instance_id, id, branches, vars).await
                }
                Node::Loop {
                    id,
                    kind,
                    body,
                    max_iterations,
                    ..
                } => {
                    self.run_loop(instance_id, id, kind, body, *max_iterations, vars)
                        .await
                }
            }
        })
    }

    async fn mark_node(
        &self,
        instance_id: Uuid,
        node_id: &str,
        status: NodeStatus,
        output: Option<Value>,
    ) -> Result<(), EngineError> {
        let mut node = self
            .store
            .get_node_instance(instance_id, node_id)
            .await?
            .unwrap_or_else(|| NodeInstance::new_pending(instance_id, node_id));

        let now = chrono::Utc::now();
        match status {
            NodeStatus::Running => node.started_at = Some(node.started_at.unwrap_or(now)),
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped => {
                node.finished_at = Some(now)
            }
            NodeStatus::Pending => {}
        }
        node.status = status;
        if output.is_some() {
            node.output = output;
        }
        self.store.upsert_node_instance(node).await?;
        Ok(())
    }

    async fn run_task(
        &self,
        instance_id: Uuid,
        node_id: &str,
        executor_name: &str,
        config: &Value,
        mut vars: Value,
    ) -> Result<Value, EngineError> {
        self.mark_node(instance_id, node_id, NodeStatus::Running, None)
            .await?;

        let executor = self
            .executors
            .get(executor_name)
            .ok_or_else(|| EngineError::Validation(format!("unknown executor `{executor_name}`")))?;

        let instance = self.store.get_instance(instance_id).await?;
        let ctx = ExecutionContext {
            task_id: node_id.to_string(),
            workflow_instance_id: instance_id,
            config: config.clone(),
            inputs: vars.clone(),
            context: instance.context_data.clone(),
        };

        match executor.execute(&ctx).await {
            Ok(output) => {
                self.mark_node(
                    instance_id,
                    node_id,
                    NodeStatus::Completed,
                    Some(output.data.clone()),
                )
                .await?;
                insert_node_output(&mut vars, node_id, output.data);
                Ok(vars)
            }
            Err(e) => {
                self.mark_node(instance_id, node_id, NodeStatus::Failed, None)
                    .await?;
                Err(EngineError::from(e))
            }
        }
    }

    async fn run_condition(
        &self,
        instance_id: Uuid,
        node_id: &str,
        guard: &str,
        true_branch: &[Node],
        false_branch: &[Node],
        vars: Value,
    ) -> Result<Value, EngineError> {
        self.mark_node(instance_id, node_id, NodeStatus::Running, None)
            .await?;

        let taken = if expr::eval_bool(guard, &vars)? {
            "true"
        } else {
            "false"
        };
        let branch = if taken == "true" {
            true_branch
        } else {
            false_branch
        };

        let vars = self.execute_nodes(instance_id, branch, vars).await?;

        self.mark_node(
            instance_id,
            node_id,
            NodeStatus::Completed,
            Some(json!({ "branch": taken })),
        )
        .await?;
        Ok(vars)
    }

    async fn run_parallel(
        &self,
        instance_id: Uuid,
        node_id: &str,
        branches: &[Vec<Node>],
        mut vars: Value,
    ) -> Result<Value, EngineError> {
        self.mark_node(instance_id, node_id, NodeStatus::Running, None)
            .await?;

        if !self.still_running(instance_id).await? {
            return Ok(vars);
        }

        let futures = branches
            .iter()
            .map(|branch| self.execute_nodes(instance_id, branch, vars.clone()));

        // Wait for every branch to settle before inspecting results, even
        // if one already failed — SPEC_FULL.md §4.7/§9 mandates this for
        // determinism over cancelling siblings early.
        let results = join_all(futures).await;

        let mut first_error = None;
        let mut branch_outputs = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(branch_vars) => branch_outputs.push(branch_vars),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            self.mark_node(instance_id, node_id, NodeStatus::Failed, None)
                .await?;
            return Err(e);
        }

        let merged: Value = Value::Object(
            branch_outputs
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
        );
        insert_under(&mut vars, "branches", node_id, merged.clone());

        self.mark_node(instance_id, node_id, NodeStatus::Completed, Some(merged))
            .await?;
        Ok(vars)
    }

    async fn run_loop(
        &self,
        instance_id: Uuid,
        node_id: &str,
        kind: &LoopKind,
        body: &[Node],
        max_iterations_override: Option<u32>,
        mut vars: Value,
    ) -> Result<Value, EngineError> {
        self.mark_node(instance_id, node_id, NodeStatus::Running, None)
            .await?;

        let hard_cap = self.config.max_loop_iterations;
        let effective_max = max_iterations_override
            .map(|m| m.min(hard_cap))
            .unwrap_or(hard_cap);

        let mut results = Vec::new();
        let mut index: u32 = 0;

        loop {
            if !self.still_running(instance_id).await? {
                break;
            }
            if index >= effective_max {
                let count = results.len() as u32;
                let loop_output = json!({ "results": results, "count": count });
                insert_under(&mut vars, "loops", node_id, loop_output.clone());
                self.mark_node(instance_id, node_id, NodeStatus::Failed, Some(loop_output))
                    .await?;
                // Persist the partial vars (with this loop's results/count
                // already merged in) onto the instance before failing, so
                // they're still observable once the run loop marks the
                // instance Failed. `Running -> Running` is a same-status
                // patch, not a transition, so it's allowed mid-run.
                self.store
                    .update_status(
                        instance_id,
                        WorkflowStatus::Running,
                        crate::store::StatusPatch {
                            output_data: Some(vars),
                            ..Default::default()
                        },
                    )
                    .await?;
                // Exceeding the hard cap is a definition/runaway-guard
                // problem, not a transient executor hiccup: it must not be
                // retried (SPEC_FULL.md §8 scenario 4).
                return Err(EngineError::Fatal(format!(
                    "loop `{node_id}` exceeded max iterations ({effective_max})"
                )));
            }

            let (item, should_continue) = match kind {
                LoopKind::While { predicate } => {
                    let probe = with_loop_locals(&vars, node_id, index, Value::Null);
                    if !expr::eval_bool(predicate, &probe)? {
                        (Value::Null, false)
                    } else {
                        (Value::Null, true)
                    }
                }
                LoopKind::For { start, end, step } => {
                    let current = start + (*step) * index as i64;
                    let continues = if *step > 0 {
                        current < *end
                    } else if *step < 0 {
                        current > *end
                    } else {
                        false
                    };
                    (json!(current), continues)
                }
                LoopKind::ForEach { array_path } => {
                    let array = resolve_dotted(&vars, array_path).unwrap_or(Value::Array(vec![]));
                    let array = array.as_array().cloned().unwrap_or_default();
                    match array.get(index as usize) {
                        Some(item) => (item.clone(), true),
                        None => (Value::Null, false),
                    }
                }
            };

            if !should_continue {
                break;
            }

            let child_vars = with_loop_locals(&vars, node_id, index, item);
            let child_vars = self.execute_nodes(instance_id, body, child_vars).await?;
            results.push(child_vars);
            index += 1;
        }

        let count = results.len() as u32;
        let loop_output = json!({ "results": results, "count": count });
        insert_under(&mut vars, "loops", node_id, loop_output.clone());

        self.mark_node(instance_id, node_id, NodeStatus::Completed, Some(loop_output))
            .await?;
        Ok(vars)
    }
}

fn with_loop_locals(vars: &Value, loop_id: &str, index: u32, item: Value) -> Value {
    let mut child = vars.clone();
    if let Value::Object(map) = &mut child {
        map.insert("$iteration".into(), json!(index + 1));
        map.insert("$index".into(), json!(index));
        map.insert("$item".into(), item);
        map.insert("$loopId".into(), json!(loop_id));
    }
    child
}

fn resolve_dotted(vars: &Value, path: &str) -> Option<Value> {
    let mut cur = vars;
    for seg in path.split('.') {
        cur = cur.get(seg)?;
    }
    Some(cur.clone())
}

fn insert_node_output(vars: &mut Value, node_id: &str, output: Value) {
    insert_under(vars, "nodes", node_id, json!({ "output": output }));
}

fn insert_under(vars: &mut Value, bucket: &str, node_id: &str, value: Value) {
    if let Value::Object(root) = vars {
        let entry = root
            .entry(bucket.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = entry {
            map.insert(node_id.to_string(), value);
        }
    } else {
        warn!("variable map root was not an object; dropping node output");
    }
}

fn merge_cached_output(mut vars: Value, node_id: &str, output: Option<Value>) -> Value {
    if let Some(output) = output {
        insert_node_output(&mut vars, node_id, output);
    }
    vars
}
