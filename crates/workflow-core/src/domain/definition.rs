//! Workflow definitions: the immutable template a `WorkflowInstance` executes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A versioned, immutable workflow template.
///
/// New edits always create a new version row; `is_active` marks which
/// version is resolved by name when a caller does not pin a version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub version: i32,
    pub nodes: Vec<Node>,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<String>,
    pub config: DefinitionConfig,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl WorkflowDefinition {
    /// All node ids appearing anywhere in the definition, including nested
    /// branches, recursively.
    pub fn all_node_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        for node in &self.nodes {
            collect_node_ids(node, &mut ids);
        }
        ids
    }

    /// Find a node by id anywhere in the tree.
    pub fn find_node<'a>(&'a self, node_id: &str) -> Option<&'a Node> {
        self.nodes.iter().find_map(|n| find_node_in(n, node_id))
    }

    /// Every `Task.executor_name` appearing anywhere in the definition,
    /// recursively. Used by the Scheduler to resolve which executors a
    /// takeover engine must support for an instance of this definition
    /// (SPEC_FULL.md §4.5 step c).
    pub fn executor_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for node in &self.nodes {
            collect_executor_names(node, &mut names);
        }
        names
    }
}

fn collect_node_ids<'a>(node: &'a Node, out: &mut Vec<&'a str>) {
    out.push(node.id());
    match node {
        Node::Task { .. } => {}
        Node::Parallel { branches, .. } => {
            for branch in branches {
                for n in branch {
                    collect_node_ids(n, out);
                }
            }
        }
        Node::Condition {
            true_branch,
            false_branch,
            ..
        } => {
            for n in true_branch {
                collect_node_ids(n, out);
            }
            for n in false_branch {
                collect_node_ids(n, out);
            }
        }
        Node::Loop { body, .. } => {
            for n in body {
                collect_node_ids(n, out);
            }
        }
    }
}

fn collect_executor_names<'a>(node: &'a Node, out: &mut Vec<&'a str>) {
    match node {
        Node::Task { executor_name, .. } => out.push(executor_name),
        Node::Parallel { branches, .. } => {
            for branch in branches {
                for n in branch {
                    collect_executor_names(n, out);
                }
            }
        }
        Node::Condition {
            true_branch,
            false_branch,
            ..
        } => {
            for n in true_branch {
                collect_executor_names(n, out);
            }
            for n in false_branch {
                collect_executor_names(n, out);
            }
        }
        Node::Loop { body, .. } => {
            for n in body {
                collect_executor_names(n, out);
            }
        }
    }
}

fn find_node_in<'a>(node: &'a Node, target: &str) -> Option<&'a Node> {
    if node.id() == target {
        return Some(node);
    }
    match node {
        Node::Task { .. } => None,
        Node::Parallel { branches, .. } => branches
            .iter()
            .flatten()
            .find_map(|n| find_node_in(n, target)),
        Node::Condition {
            true_branch,
            false_branch,
            ..
        } => true_branch
            .iter()
            .find_map(|n| find_node_in(n, target))
            .or_else(|| false_branch.iter().find_map(|n| find_node_in(n, target))),
        Node::Loop { body, .. } => body.iter().find_map(|n| find_node_in(n, target)),
    }
}

/// A single declared input of a definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputSpec {
    pub name: String,
    pub required: bool,
}

/// Non-node definition-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefinitionConfig {
    pub retry_policy: RetryPolicy,
    pub priority: i32,
}

impl Default for DefinitionConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            priority: 0,
        }
    }
}

/// Run-level retry policy. Unlike a generic exponential-backoff policy,
/// this crate's retry delay formula is fixed (SPEC_FULL.md §4.7); the
/// definition only contributes `max_retries`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// A node in a workflow definition's tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Task {
        id: String,
        executor_name: String,
        #[serde(default)]
        config: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guard_expr: Option<String>,
    },
    Parallel {
        id: String,
        branches: Vec<Vec<Node>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guard_expr: Option<String>,
    },
    Condition {
        id: String,
        expr: String,
        true_branch: Vec<Node>,
        false_branch: Vec<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guard_expr: Option<String>,
    },
    Loop {
        id: String,
        kind: LoopKind,
        body: Vec<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_iterations: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guard_expr: Option<String>,
    },
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Task { id, .. }
            | Node::Parallel { id, .. }
            | Node::Condition { id, .. }
            | Node::Loop { id, .. } => id,
        }
    }

    pub fn guard_expr(&self) -> Option<&str> {
        match self {
            Node::Task { guard_expr, .. }
            | Node::Parallel { guard_expr, .. }
            | Node::Condition { guard_expr, .. }
            | Node::Loop { guard_expr, .. } => guard_expr.as_deref(),
        }
    }
}

/// The three loop flavors from SPEC_FULL.md §4.7.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopKind {
    While { predicate: String },
    For { start: i64, end: i64, step: i64 },
    ForEach { array_path: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "sample".into(),
            version: 1,
            nodes: vec![Node::Condition {
                id: "c1".into(),
                expr: "x > 1".into(),
                true_branch: vec![Node::Task {
                    id: "t1".into(),
                    executor_name: "noop".into(),
                    config: Value::Null,
                    guard_expr: None,
                }],
                false_branch: vec![Node::Task {
                    id: "t2".into(),
                    executor_name: "noop".into(),
                    config: Value::Null,
                    guard_expr: None,
                }],
                guard_expr: None,
            }],
            inputs: vec![],
            outputs: vec![],
            config: DefinitionConfig::default(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn collects_nested_node_ids() {
        let def = sample_definition();
        let ids = def.all_node_ids();
        assert_eq!(ids, vec!["c1", "t1", "t2"]);
    }

    #[test]
    fn collects_nested_executor_names() {
        let def = sample_definition();
        assert_eq!(def.executor_names(), vec!["noop", "noop"]);
    }

    #[test]
    fn finds_nested_node_by_id() {
        let def = sample_definition();
        let node = def.find_node("t2").unwrap();
        assert_eq!(node.id(), "t2");
    }

    #[test]
    fn tagged_serde_round_trip() {
        let node = Node::Loop {
            id: "l1".into(),
            kind: LoopKind::ForEach {
                array_path: "items".into(),
            },
            body: vec![],
            max_iterations: Some(50),
            guard_expr: None,
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "loop");
        assert_eq!(json["kind"], "for_each");
        let round_tripped: Node = serde_json::from_value(json).unwrap();
        assert_eq!(round_tripped, node);
    }
}
