//! Scheduler (C5): engine liveness sweep and failover driver, plus the
//! per-engine ownership-renewal loop.
//!
//! Grounded on `worker/poller.rs`'s adaptive-interval poll loop for the
//! overall "tokio::time::interval tick → do work → repeat" shape, and on
//! `worker/backpressure.rs`'s idea of a lightweight coordinator sitting in
//! front of shared state. Leader election (SPEC_FULL.md §4.5) reuses
//! `crate::lock::LockService` directly rather than a separate election
//! primitive — the same reuse-don't-reinvent decision `crate::mutex` makes
//! for business-key exclusivity.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::cluster::EngineRegistry;
use crate::config::EngineConfig;
use crate::definitions::DefinitionStore;
use crate::domain::{EngineInstance, FailoverEvent, FailoverStatus, WorkflowInstance, WorkflowStatus};
use crate::error::EngineError;
use crate::lock::LockService;
use crate::store::InstanceStore;

const LEADER_LOCK_KEY: &str = "scheduler:leader";
const LEADER_LOCK_TTL: Duration = Duration::from_secs(60);

/// Drives the two control loops described in SPEC_FULL.md §4.5. One
/// `Scheduler` value runs per engine process; only the one currently
/// holding `scheduler:leader` does any liveness-sweep work on a given
/// tick, but every engine always runs its own ownership-renewal loop.
pub struct Scheduler {
    engine_id: Uuid,
    registry: Arc<dyn EngineRegistry>,
    store: Arc<dyn InstanceStore>,
    locks: Arc<dyn LockService>,
    definitions: Arc<dyn DefinitionStore>,
    config: EngineConfig,
}

impl Scheduler {
    pub fn new(
        engine_id: Uuid,
        registry: Arc<dyn EngineRegistry>,
        store: Arc<dyn InstanceStore>,
        locks: Arc<dyn LockService>,
        definitions: Arc<dyn DefinitionStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine_id,
            registry,
            store,
            locks,
            definitions,
            config,
        }
    }

    /// Runs both loops until the process is torn down. Intended to be
    /// spawned once per engine at startup.
    pub async fn run(&self) {
        let mut sweep_tick = interval(self.config.scheduler_sweep_interval());
        let mut renewal_tick = interval(Duration::from_secs(10));

        loop {
            tokio::select! {
                _ = sweep_tick.tick() => {
                    if let Err(e) = self.try_liveness_sweep().await {
                        error!(error = %e, "liveness sweep failed");
                    }
                }
                _ = renewal_tick.tick() => {
                    if let Err(e) = self.renew_ownership().await {
                        warn!(error = %e, "ownership renewal pass failed");
                    }
                }
            }
        }
    }

    /// Attempt to become leader for this tick and, if successful, run the
    /// liveness sweep. A non-leader tick is a silent no-op.
    async fn try_liveness_sweep(&self) -> Result<(), EngineError> {
        let owner_id = self.engine_id.to_string();
        let became_leader = self
            .locks
            .acquire(LEADER_LOCK_KEY, LEADER_LOCK_TTL, &owner_id)
            .await?;
        if !became_leader {
            return Ok(());
        }
        self.liveness_sweep().await
    }

    #[instrument(skip(self))]
    async fn liveness_sweep(&self) -> Result<(), EngineError> {
        let threshold = chrono::Duration::seconds(self.config.liveness_window_seconds as i64);
        let stale = self.registry.list_stale(threshold).await?;

        for engine in stale {
            if let Err(e) = self.failover_one(&engine).await {
                warn!(engine = %engine.instance_id, error = %e, "failover attempt failed, will retry next sweep");
            }
        }
        Ok(())
    }

    async fn failover_one(&self, failed: &EngineInstance) -> Result<(), EngineError> {
        let mut event = FailoverEvent {
            event_id: Uuid::now_v7(),
            failed_engine_id: failed.instance_id,
            takeover_engine_id: None,
            reason: "heartbeat_timeout".into(),
            affected_workflow_ids: vec![],
            status: FailoverStatus::Initiated,
            failover_at: Utc::now(),
            recovery_completed_at: None,
        };
        self.store.create_failover_event(event.clone()).await?;

        let affected = self
            .store
            .find_by_assigned_engine(
                failed.instance_id,
                &[WorkflowStatus::Running, WorkflowStatus::Pending],
            )
            .await?;
        let running_nodes = self.store.find_running_nodes_by_engine(failed.instance_id).await?;
        event.affected_workflow_ids = affected.iter().map(|i| i.id).collect();

        // Resolve each affected instance's required executors from its
        // definition, and the union across all of them, to pick a takeover
        // engine (SPEC_FULL.md §4.5 step c).
        let mut requirements: Vec<(&WorkflowInstance, Vec<String>)> = Vec::with_capacity(affected.len());
        let mut union_required: HashSet<String> = HashSet::new();
        for instance in &affected {
            let reqs = self.required_executors_for(instance).await;
            union_required.extend(reqs.iter().cloned());
            requirements.push((instance, reqs));
        }
        let union_required: Vec<String> = union_required.into_iter().collect();

        let active = self.registry.list_active(chrono::Duration::seconds(
            self.config.liveness_window_seconds as i64,
        )).await?;
        let candidates: Vec<&EngineInstance> = active
            .iter()
            .filter(|e| e.instance_id != failed.instance_id)
            .collect();

        let takeover = select_takeover(&candidates, &union_required);

        let Some(takeover) = takeover else {
            event.status = FailoverStatus::Failed;
            event.reason = format!("{}; no eligible takeover engine", event.reason);
            self.store.update_failover_event(event).await?;
            return Err(EngineError::Fatal(format!(
                "no takeover engine available for {}",
                failed.instance_id
            )));
        };
        event.takeover_engine_id = Some(takeover.instance_id);

        // Instances the chosen takeover can actually run are transferred;
        // any the takeover can't run are skipped and recorded unassignable
        // rather than handed to an engine missing an executor they need.
        let (assignable, unassignable): (Vec<_>, Vec<_>) = requirements
            .into_iter()
            .partition(|(_, reqs)| takeover.supports_all(reqs));

        let instance_ids: Vec<Uuid> = assignable.iter().map(|(i, _)| i.id).collect();
        let unassignable_ids: Vec<Uuid> = unassignable.iter().map(|(i, _)| i.id).collect();
        if !unassignable_ids.is_empty() {
            let ids = unassignable_ids
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>()
                .join(",");
            event.reason = format!("{}; unassignable: {ids}", event.reason);
            warn!(
                failed = %failed.instance_id,
                unassignable = unassignable_ids.len(),
                "some instances have no compatible takeover engine"
            );
        }

        let assignable_set: HashSet<Uuid> = instance_ids.iter().copied().collect();
        let running_nodes: Vec<(Uuid, String)> = running_nodes
            .into_iter()
            .filter(|(instance_id, _)| assignable_set.contains(instance_id))
            .collect();

        let transfer_result = async {
            self.store
                .transfer_instances(&instance_ids, failed.instance_id, takeover.instance_id)
                .await?;
            self.store.reset_nodes(&running_nodes).await
        }
        .await;

        match transfer_result {
            Ok(()) => {
                event.status = FailoverStatus::Completed;
                event.recovery_completed_at = Some(Utc::now());
                self.store.update_failover_event(event).await?;
                self.registry.mark_inactive(failed.instance_id).await?;
                info!(
                    failed = %failed.instance_id,
                    takeover = %takeover.instance_id,
                    instances = instance_ids.len(),
                    unassignable = unassignable_ids.len(),
                    "failover completed"
                );
                Ok(())
            }
            Err(e) => {
                event.status = FailoverStatus::Failed;
                event.reason = format!("{}; {}", event.reason, e);
                self.store.update_failover_event(event).await?;
                Err(EngineError::from(e))
            }
        }
    }

    /// The executors an affected instance's definition requires, looked up
    /// by `definition_id`. An instance whose definition can't be resolved
    /// (e.g. the Definition Service is briefly unreachable) is treated as
    /// requirement-free rather than blocking the whole failover.
    async fn required_executors_for(&self, instance: &WorkflowInstance) -> Vec<String> {
        match self.definitions.get_by_id(instance.definition_id).await {
            Ok(Some(definition)) => definition
                .executor_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            Ok(None) => {
                warn!(instance = %instance.id, definition = %instance.definition_id, "definition not found during failover, treating as requirement-free");
                Vec::new()
            }
            Err(e) => {
                warn!(instance = %instance.id, error = %e, "failed to resolve definition during failover, treating as requirement-free");
                Vec::new()
            }
        }
    }

    /// Renews `wf:<id>` for every instance this engine owns. An instance
    /// whose renewal fails is not re-claimed here; the engine simply stops
    /// trying to renew it, and the Scheduler's next liveness sweep (run by
    /// whichever engine is leader) will eventually reassign it if this
    /// engine is actually dead, or this engine will pick it back up the
    /// next time it successfully renews if it was a transient blip.
    async fn renew_ownership(&self) -> Result<(), EngineError> {
        let owned = self
            .store
            .find_by_assigned_engine(self.engine_id, &[WorkflowStatus::Running])
            .await?;

        let owner_id = self.engine_id.to_string();
        for instance in owned {
            let lock_key = format!("wf:{}", instance.id);
            let renewed = self
                .locks
                .renew(&lock_key, &owner_id, self.config.instance_lock_ttl())
                .await?;
            if !renewed {
                warn!(instance = %instance.id, "failed to renew instance lock, releasing local ownership");
            }
        }

        Ok(())
    }
}

/// `argmin(load)` over engines that are a superset match for
/// `required_executors`; falls back to the engine(s) with the greatest
/// overlap (by `supports_count`) if no perfect superset exists, breaking
/// overlap ties by load (SPEC_FULL.md §4.5 step c).
fn select_takeover<'a>(
    candidates: &[&'a EngineInstance],
    required_executors: &[String],
) -> Option<&'a EngineInstance> {
    let supersets: Vec<&&EngineInstance> = candidates
        .iter()
        .filter(|e| e.supports_all(required_executors))
        .collect();

    if !supersets.is_empty() {
        return supersets
            .into_iter()
            .min_by(|a, b| {
                let ua = a.load_info.utilization();
                let ub = b.load_info.utilization();
                ua.partial_cmp(&ub).unwrap_or(std::cmp::Ordering::Equal)
            })
            .copied();
    }

    let best_overlap = candidates
        .iter()
        .map(|e| e.supports_count(required_executors))
        .max()?;

    candidates
        .iter()
        .filter(|e| e.supports_count(required_executors) == best_overlap)
        .min_by(|a, b| {
            let ua = a.load_info.utilization();
            let ub = b.load_info.utilization();
            ua.partial_cmp(&ub).unwrap_or(std::cmp::Ordering::Equal)
        })
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EngineStatus, LoadInfo};

    fn engine(id: Uuid, load: u32, cap: u32, executors: &[&str]) -> EngineInstance {
        EngineInstance {
            instance_id: id,
            hostname: "h".into(),
            process_id: 1,
            status: EngineStatus::Active,
            load_info: LoadInfo {
                current_load: load,
                max_capacity: cap,
            },
            supported_executors: executors.iter().map(|s| s.to_string()).collect(),
            started_at: Utc::now(),
            last_heartbeat: Utc::now(),
        }
    }

    #[test]
    fn picks_least_loaded_superset_match() {
        let a = engine(Uuid::now_v7(), 8, 10, &["http"]);
        let b = engine(Uuid::now_v7(), 2, 10, &["http"]);
        let candidates = vec![&a, &b];
        let chosen = select_takeover(&candidates, &["http".to_string()]).unwrap();
        assert_eq!(chosen.instance_id, b.instance_id);
    }

    #[test]
    fn falls_back_to_best_overlap_when_no_superset() {
        let a = engine(Uuid::now_v7(), 1, 10, &["http"]);
        let candidates = vec![&a];
        let chosen = select_takeover(&candidates, &["http".to_string(), "shell".to_string()]).unwrap();
        assert_eq!(chosen.instance_id, a.instance_id);
    }

    #[test]
    fn overlap_ranking_beats_idle_engine_with_no_matching_executors() {
        // `idle` supports none of the required executors but is least
        // loaded; `partial_match` covers 2 of 3 and must win anyway.
        let idle = engine(Uuid::now_v7(), 0, 10, &["unrelated"]);
        let partial_match = engine(Uuid::now_v7(), 9, 10, &["http", "shell"]);
        let candidates = vec![&idle, &partial_match];
        let required = vec!["http".to_string(), "shell".to_string(), "email".to_string()];
        let chosen = select_takeover(&candidates, &required).unwrap();
        assert_eq!(chosen.instance_id, partial_match.instance_id);
    }

    #[test]
    fn no_candidates_returns_none() {
        let candidates: Vec<&EngineInstance> = vec![];
        assert!(select_takeover(&candidates, &[]).is_none());
    }

    use crate::cluster::InMemoryEngineRegistry;
    use crate::definitions::InMemoryDefinitionService;
    use crate::domain::{DefinitionConfig, Node, NodeInstance, NodeStatus, WorkflowInstance};
    use crate::lock::InMemoryLockService;
    use crate::store::InMemoryInstanceStore;
    use serde_json::json;

    fn scheduler_for(
        engine_id: Uuid,
        registry: Arc<dyn EngineRegistry>,
        store: Arc<dyn InstanceStore>,
        locks: Arc<dyn LockService>,
        definitions: Arc<dyn DefinitionStore>,
    ) -> Scheduler {
        Scheduler::new(engine_id, registry, store, locks, definitions, EngineConfig::default())
    }

    fn noop_definition(executor_name: &str) -> crate::domain::WorkflowDefinition {
        crate::domain::WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "wf-def".into(),
            version: 1,
            nodes: vec![Node::Task {
                id: "n1".into(),
                executor_name: executor_name.into(),
                config: json!(null),
                guard_expr: None,
            }],
            inputs: vec![],
            outputs: vec![],
            config: DefinitionConfig::default(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn running_instance(engine_id: Uuid, definition_id: Uuid) -> WorkflowInstance {
        let now = Utc::now();
        WorkflowInstance {
            id: Uuid::now_v7(),
            definition_id,
            name: "wf".into(),
            status: WorkflowStatus::Running,
            input_data: json!({}),
            output_data: json!(null),
            context_data: json!({}),
            started_at: Some(now),
            completed_at: None,
            paused_at: None,
            error_message: None,
            error_details: None,
            retry_count: 0,
            max_retries: 3,
            priority: 0,
            scheduled_at: now,
            business_key: None,
            mutex_key: None,
            assigned_engine_id: Some(engine_id),
            lock_owner: None,
            lock_acquired_at: None,
            last_heartbeat: None,
            created_at: now,
            updated_at: now,
            created_by: None,
        }
    }

    /// Invariant: after a failover, every instance previously owned by the
    /// dead engine is owned by exactly one live engine, and none are left
    /// dangling on the dead one.
    #[tokio::test]
    async fn failover_transfers_instances_and_marks_failed_engine_inactive() {
        let registry: Arc<dyn EngineRegistry> = Arc::new(InMemoryEngineRegistry::new());
        let store: Arc<dyn InstanceStore> = Arc::new(InMemoryInstanceStore::new());
        let locks: Arc<dyn LockService> = Arc::new(InMemoryLockService::new());
        let definitions: Arc<dyn DefinitionStore> = Arc::new(InMemoryDefinitionService::new());

        let dead = engine(Uuid::now_v7(), 5, 10, &["noop"]);
        let alive = engine(Uuid::now_v7(), 1, 10, &["noop"]);
        registry.register(dead.clone()).await.unwrap();
        registry.register(alive.clone()).await.unwrap();

        let def = noop_definition("noop");
        definitions.create(def.clone()).await.unwrap();

        let instance = running_instance(dead.instance_id, def.id);
        store.create_instance(instance.clone()).await.unwrap();
        store
            .upsert_node_instance(NodeInstance {
                id: Uuid::now_v7(),
                workflow_instance_id: instance.id,
                node_id: "n1".into(),
                status: NodeStatus::Running,
                started_at: Some(Utc::now()),
                finished_at: None,
                output: None,
            })
            .await
            .unwrap();

        let scheduler = scheduler_for(
            Uuid::now_v7(),
            registry.clone(),
            store.clone(),
            locks,
            definitions,
        );
        scheduler.failover_one(&dead).await.unwrap();

        let moved = store.get_instance(instance.id).await.unwrap();
        assert_eq!(moved.assigned_engine_id, Some(alive.instance_id));

        let node = store.get_node_instance(instance.id, "n1").await.unwrap().unwrap();
        assert_eq!(node.status, NodeStatus::Pending);

        assert!(registry.get(dead.instance_id).await.unwrap().unwrap().status != EngineStatus::Active);

        let events = store.list_failover_events().await.unwrap();
        let event = events.iter().find(|e| e.failed_engine_id == dead.instance_id).unwrap();
        assert_eq!(event.status, FailoverStatus::Completed);
        assert_eq!(event.takeover_engine_id, Some(alive.instance_id));
        assert_eq!(event.affected_workflow_ids, vec![instance.id]);
    }

    /// Invariant: an affected instance whose required executor no active
    /// engine supports is skipped, left on the (now inactive) failed
    /// engine, and recorded as unassignable rather than silently
    /// transferred to an engine that can't run it.
    #[tokio::test]
    async fn instance_with_unsupported_executor_is_left_unassignable() {
        let registry: Arc<dyn EngineRegistry> = Arc::new(InMemoryEngineRegistry::new());
        let store: Arc<dyn InstanceStore> = Arc::new(InMemoryInstanceStore::new());
        let locks: Arc<dyn LockService> = Arc::new(InMemoryLockService::new());
        let definitions: Arc<dyn DefinitionStore> = Arc::new(InMemoryDefinitionService::new());

        let dead = engine(Uuid::now_v7(), 5, 10, &["shell"]);
        let alive = engine(Uuid::now_v7(), 1, 10, &["http"]);
        registry.register(dead.clone()).await.unwrap();
        registry.register(alive.clone()).await.unwrap();

        let def = noop_definition("shell");
        definitions.create(def.clone()).await.unwrap();

        let instance = running_instance(dead.instance_id, def.id);
        store.create_instance(instance.clone()).await.unwrap();

        let scheduler = scheduler_for(
            Uuid::now_v7(),
            registry.clone(),
            store.clone(),
            locks,
            definitions,
        );
        scheduler.failover_one(&dead).await.unwrap();

        let untouched = store.get_instance(instance.id).await.unwrap();
        assert_eq!(untouched.assigned_engine_id, Some(dead.instance_id));

        let events = store.list_failover_events().await.unwrap();
        let event = events.iter().find(|e| e.failed_engine_id == dead.instance_id).unwrap();
        assert_eq!(event.status, FailoverStatus::Completed);
        assert!(event.reason.contains("unassignable"));
        assert!(event.reason.contains(&instance.id.to_string()));
    }

    /// Invariant: a sweep with no stale engines leaves the registry and
    /// store untouched, and emits no failover events.
    #[tokio::test]
    async fn liveness_sweep_is_a_noop_when_nothing_is_stale() {
        let registry: Arc<dyn EngineRegistry> = Arc::new(InMemoryEngineRegistry::new());
        let store: Arc<dyn InstanceStore> = Arc::new(InMemoryInstanceStore::new());
        let locks: Arc<dyn LockService> = Arc::new(InMemoryLockService::new());
        let definitions: Arc<dyn DefinitionStore> = Arc::new(InMemoryDefinitionService::new());

        let a = engine(Uuid::now_v7(), 1, 10, &["noop"]);
        registry.register(a).await.unwrap();

        let scheduler = scheduler_for(Uuid::now_v7(), registry, store.clone(), locks, definitions);
        scheduler.liveness_sweep().await.unwrap();

        assert!(store.list_failover_events().await.unwrap().is_empty());
    }
}
