use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{is_allowed_transition, InstanceStore, StatusPatch, StoreError};
use crate::domain::{FailoverEvent, NodeInstance, NodeStatus, WorkflowInstance, WorkflowStatus};

pub struct InMemoryInstanceStore {
    instances: RwLock<HashMap<Uuid, WorkflowInstance>>,
    nodes: RwLock<HashMap<(Uuid, String), NodeInstance>>,
    failovers: RwLock<HashMap<Uuid, FailoverEvent>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            failovers: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryInstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn create_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError> {
        self.instances.write().insert(instance.id, instance);
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> Result<WorkflowInstance, StoreError> {
        self.instances
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update_status(
        &self,
        id: Uuid,
        new_status: WorkflowStatus,
        patch: StatusPatch,
    ) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if instance.status != new_status && !is_allowed_transition(instance.status, new_status) {
            return Err(StoreError::InvalidTransition {
                from: instance.status.to_string(),
                to: new_status.to_string(),
            });
        }

        let now = Utc::now();
        instance.status = new_status;
        if new_status == WorkflowStatus::Running && instance.started_at.is_none() {
            instance.started_at = Some(now);
        }
        if new_status.is_terminal() {
            instance.completed_at = Some(now);
        } else {
            instance.completed_at = None;
        }
        if new_status == WorkflowStatus::Paused {
            instance.paused_at = patch.paused_at.or(Some(now));
        }
        if let Some(v) = patch.output_data {
            instance.output_data = v;
        }
        if let Some(v) = patch.context_data {
            instance.context_data = v;
        }
        if let Some(v) = patch.error_message {
            instance.error_message = Some(v);
        }
        if new_status != WorkflowStatus::Failed && new_status != WorkflowStatus::Running {
            // keep history; only cleared explicitly by callers if needed
        }
        if let Some(v) = patch.error_details {
            instance.error_details = Some(v);
        }
        if let Some(v) = patch.retry_count {
            instance.retry_count = v;
        }
        if let Some(v) = patch.assigned_engine_id {
            instance.assigned_engine_id = Some(v);
        }
        if let Some(v) = patch.lock_owner {
            instance.lock_owner = Some(v);
        }
        instance.updated_at = now;

        Ok(())
    }

    async fn find_by_assigned_engine(
        &self,
        engine_id: Uuid,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        Ok(self
            .instances
            .read()
            .values()
            .filter(|i| i.assigned_engine_id == Some(engine_id) && statuses.contains(&i.status))
            .cloned()
            .collect())
    }

    async fn find_by_mutex_key(
        &self,
        key: &str,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        Ok(self
            .instances
            .read()
            .values()
            .filter(|i| i.mutex_key.as_deref() == Some(key) && i.status == status)
            .cloned()
            .collect())
    }

    async fn upsert_node_instance(&self, node: NodeInstance) -> Result<(), StoreError> {
        self.nodes
            .write()
            .insert((node.workflow_instance_id, node.node_id.clone()), node);
        Ok(())
    }

    async fn get_node_instance(
        &self,
        workflow_instance_id: Uuid,
        node_id: &str,
    ) -> Result<Option<NodeInstance>, StoreError> {
        Ok(self
            .nodes
            .read()
            .get(&(workflow_instance_id, node_id.to_string()))
            .cloned())
    }

    async fn find_running_nodes_by_engine(
        &self,
        engine_id: Uuid,
    ) -> Result<Vec<(Uuid, String)>, StoreError> {
        let owned: Vec<Uuid> = self
            .instances
            .read()
            .values()
            .filter(|i| i.assigned_engine_id == Some(engine_id))
            .map(|i| i.id)
            .collect();

        Ok(self
            .nodes
            .read()
            .values()
            .filter(|n| n.status == NodeStatus::Running && owned.contains(&n.workflow_instance_id))
            .map(|n| (n.workflow_instance_id, n.node_id.clone()))
            .collect())
    }

    async fn reset_nodes(&self, node_ids: &[(Uuid, String)]) -> Result<(), StoreError> {
        let mut nodes = self.nodes.write();
        for key in node_ids {
            if let Some(node) = nodes.get_mut(key) {
                if node.status == NodeStatus::Running {
                    node.status = NodeStatus::Pending;
                    node.started_at = None;
                }
            }
        }
        Ok(())
    }

    async fn transfer_instances(
        &self,
        instance_ids: &[Uuid],
        expected_engine_id: Uuid,
        to_engine_id: Uuid,
    ) -> Result<u64, StoreError> {
        let mut instances = self.instances.write();
        let mut count = 0u64;
        for id in instance_ids {
            if let Some(instance) = instances.get_mut(id) {
                if instance.assigned_engine_id != Some(expected_engine_id) {
                    continue;
                }
                instance.assigned_engine_id = Some(to_engine_id);
                instance.lock_owner = None;
                instance.updated_at = Utc::now();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn create_failover_event(&self, event: FailoverEvent) -> Result<(), StoreError> {
        self.failovers.write().insert(event.event_id, event);
        Ok(())
    }

    async fn update_failover_event(&self, event: FailoverEvent) -> Result<(), StoreError> {
        self.failovers.write().insert(event.event_id, event);
        Ok(())
    }

    async fn list_failover_events(&self) -> Result<Vec<FailoverEvent>, StoreError> {
        Ok(self.failovers.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkflowStatus;
    use serde_json::json;

    fn sample_instance() -> WorkflowInstance {
        let now = Utc::now();
        WorkflowInstance {
            id: Uuid::now_v7(),
            definition_id: Uuid::now_v7(),
            name: "wf".into(),
            status: WorkflowStatus::Pending,
            input_data: json!({}),
            output_data: json!({}),
            context_data: json!({}),
            started_at: None,
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
            assigned_engine_id: None,
            lock_owner: None,
            lock_acquired_at: None,
            last_heartbeat: None,
            created_at: now,
            updated_at: now,
            created_by: None,
        }
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let store = InMemoryInstanceStore::new();
        let instance = sample_instance();
        let id = instance.id;
        store.create_instance(instance).await.unwrap();

        let err = store
            .update_status(id, WorkflowStatus::Completed, StatusPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn completed_at_set_iff_terminal() {
        let store = InMemoryInstanceStore::new();
        let instance = sample_instance();
        let id = instance.id;
        store.create_instance(instance).await.unwrap();

        store
            .update_status(id, WorkflowStatus::Running, StatusPatch::default())
            .await
            .unwrap();
        assert!(store.get_instance(id).await.unwrap().completed_at.is_none());

        store
            .update_status(id, WorkflowStatus::Completed, StatusPatch::default())
            .await
            .unwrap();
        assert!(store.get_instance(id).await.unwrap().completed_at.is_some());
    }

    #[tokio::test]
    async fn reset_nodes_only_touches_running() {
        let store = InMemoryInstanceStore::new();
        let wf_id = Uuid::now_v7();
        let mut running = NodeInstance::new_pending(wf_id, "n1");
        running.status = NodeStatus::Running;
        let completed = NodeInstance::new_pending(wf_id, "n2");
        store.upsert_node_instance(running).await.unwrap();
        let mut completed = completed;
        completed.status = NodeStatus::Completed;
        store.upsert_node_instance(completed).await.unwrap();

        store
            .reset_nodes(&[(wf_id, "n1".into()), (wf_id, "n2".into())])
            .await
            .unwrap();

        assert_eq!(
            store.get_node_instance(wf_id, "n1").await.unwrap().unwrap().status,
            NodeStatus::Pending
        );
        assert_eq!(
            store.get_node_instance(wf_id, "n2").await.unwrap().unwrap().status,
            NodeStatus::Completed
        );
    }

    #[tokio::test]
    async fn transfer_instances_updates_assigned_engine() {
        let store = InMemoryInstanceStore::new();
        let mut instance = sample_instance();
        let old_engine = Uuid::now_v7();
        instance.assigned_engine_id = Some(old_engine);
        let id = instance.id;
        store.create_instance(instance).await.unwrap();
        let new_engine = Uuid::now_v7();

        let count = store
            .transfer_instances(&[id], old_engine, new_engine)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            store.get_instance(id).await.unwrap().assigned_engine_id,
            Some(new_engine)
        );
    }

    #[tokio::test]
    async fn transfer_instances_skips_mismatched_prior_owner() {
        let store = InMemoryInstanceStore::new();
        let mut instance = sample_instance();
        let old_engine = Uuid::now_v7();
        instance.assigned_engine_id = Some(old_engine);
        let id = instance.id;
        store.create_instance(instance).await.unwrap();
        let new_engine = Uuid::now_v7();
        let wrong_expected = Uuid::now_v7();

        let count = store
            .transfer_instances(&[id], wrong_expected, new_engine)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(
            store.get_instance(id).await.unwrap().assigned_engine_id,
            Some(old_engine)
        );
    }

    #[tokio::test]
    async fn find_by_mutex_key_filters_on_status() {
        let store = InMemoryInstanceStore::new();
        let mut instance = sample_instance();
        instance.mutex_key = Some("k".into());
        instance.status = WorkflowStatus::Running;
        store.create_instance(instance).await.unwrap();

        let found = store
            .find_by_mutex_key("k", WorkflowStatus::Running)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        let none = store
            .find_by_mutex_key("other", WorkflowStatus::Running)
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
