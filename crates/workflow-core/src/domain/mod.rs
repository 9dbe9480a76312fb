//! Data model shared by every component: workflow definitions, instances,
//! node instances, engine instances, locks, and failover events.

pub mod definition;
pub mod engine_instance;
pub mod failover;
pub mod instance;
pub mod lock;

pub use definition::{DefinitionConfig, InputSpec, LoopKind, Node, RetryPolicy, WorkflowDefinition};
pub use engine_instance::{EngineInstance, EngineStatus, LoadInfo};
pub use failover::{FailoverEvent, FailoverStatus};
pub use instance::{NodeInstance, NodeStatus, WorkflowInstance, WorkflowStatus};
pub use lock::Lock;
