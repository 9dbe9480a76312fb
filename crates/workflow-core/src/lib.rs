//! # Distributed Workflow Engine
//!
//! A PostgreSQL-backed engine for running node-graph workflow definitions
//! across a fleet of stateless engine processes, with cooperative
//! pause/resume, business-key mutual exclusion, and automatic failover when
//! an engine goes silent.
//!
//! ## Features
//!
//! - **Definition-driven execution**: workflows are graphs of task,
//!   condition, parallel, and loop nodes, versioned and resolved by name
//! - **Resumable by construction**: a node whose instance is already
//!   recorded `Completed` is treated as cached rather than re-run, so the
//!   same execution path drives first-run, pause/resume, and
//!   failover-recovery alike
//! - **Mutex-keyed workflows**: `MutexService` rejects a new run for a
//!   business key that already has one running, backed by the same
//!   `LockService` used for per-instance ownership
//! - **Liveness-driven failover**: `Scheduler` elects a leader, sweeps the
//!   engine registry for stale heartbeats, and reassigns a dead engine's
//!   running instances to the least-loaded surviving engine
//! - **OpenTelemetry integration**: structured tracing via `tracing` and
//!   `TelemetryConfig`/`init_telemetry`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MutexService                            │
//! │  (business-key exclusivity: createMutexWorkflow)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine                          │
//! │  (validates, starts, pauses/resumes/cancels instances;       │
//! │   NodeRunner walks the node graph: task/condition/           │
//! │   parallel/loop, with cooperative-cancellation checks)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!       InstanceStore     LockService   ExecutorRegistry
//!      (Postgres/memory)  (Postgres/     (named Executor
//!                          memory)        implementations)
//!                              ▲
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                              │
//! │  (leader-elected liveness sweep + per-engine ownership        │
//! │   renewal, reading/writing EngineRegistry and InstanceStore) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use workflow_core::prelude::*;
//!
//! let executors = Arc::new(ExecutorRegistry::new());
//! executors.register("http", Arc::new(MyHttpExecutor));
//!
//! let engine = WorkflowEngine::new(
//!     Uuid::now_v7(),
//!     store,
//!     locks,
//!     executors,
//!     EngineConfig::from_env()?,
//! );
//!
//! let instance = engine.start(&definition, json!({"accountId": "acct-1"})).await?;
//! ```

pub mod cluster;
pub mod config;
pub mod definitions;
pub mod domain;
pub mod engine;
pub mod error;
pub mod executor;
pub mod expr;
pub mod lock;
pub mod mutex;
pub mod scheduler;
pub mod store;
pub mod telemetry;

/// Prelude for common imports
pub mod prelude {
    pub use crate::cluster::{EngineRegistry, InMemoryEngineRegistry, PostgresEngineRegistry, RegistryError};
    pub use crate::config::{ConfigError, EngineConfig};
    pub use crate::definitions::{
        DefinitionError, DefinitionService, DefinitionStore, InMemoryDefinitionService,
        PostgresDefinitionService,
    };
    pub use crate::domain::{
        DefinitionConfig, EngineInstance, EngineStatus, FailoverEvent, FailoverStatus, InputSpec,
        Lock, LoadInfo, LoopKind, Node, NodeInstance, NodeStatus, RetryPolicy as NodeRetryPolicy,
        WorkflowDefinition, WorkflowInstance, WorkflowStatus,
    };
    pub use crate::engine::WorkflowEngine;
    pub use crate::error::{ErrorKind, EngineError};
    pub use crate::executor::{
        ExecutionContext, Executor, ExecutorError, ExecutorOutput, ExecutorRegistry, NoopExecutor,
    };
    pub use crate::expr::{eval, eval_bool, ExprError};
    pub use crate::lock::{InMemoryLockService, LockError, LockService, PostgresLockService};
    pub use crate::mutex::{DefinitionRef, MutexError, MutexOutcome, MutexService};
    pub use crate::scheduler::Scheduler;
    pub use crate::store::{InMemoryInstanceStore, InstanceStore, PostgresInstanceStore, StatusPatch, StoreError};
    pub use crate::telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
}

// Re-export key types at crate root
pub use cluster::{EngineRegistry, InMemoryEngineRegistry, PostgresEngineRegistry, RegistryError};
pub use config::{ConfigError, EngineConfig};
pub use definitions::{
    DefinitionError, DefinitionService, DefinitionStore, InMemoryDefinitionService,
    PostgresDefinitionService,
};
pub use domain::{
    DefinitionConfig, EngineInstance, EngineStatus, FailoverEvent, FailoverStatus, InputSpec,
    Lock, LoadInfo, LoopKind, Node, NodeInstance, NodeStatus, WorkflowDefinition, WorkflowInstance,
    WorkflowStatus,
};
pub use engine::WorkflowEngine;
pub use error::{ErrorKind, EngineError};
pub use executor::{ExecutionContext, Executor, ExecutorError, ExecutorOutput, ExecutorRegistry, NoopExecutor};
pub use expr::{eval, eval_bool, ExprError};
pub use lock::{InMemoryLockService, LockError, LockService, PostgresLockService};
pub use mutex::{DefinitionRef, MutexError, MutexOutcome, MutexService};
pub use scheduler::Scheduler;
pub use store::{InMemoryInstanceStore, InstanceStore, PostgresInstanceStore, StatusPatch, StoreError};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
