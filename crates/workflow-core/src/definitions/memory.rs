use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{DefinitionError, DefinitionStore};
use crate::domain::WorkflowDefinition;

pub struct InMemoryDefinitionService {
    definitions: RwLock<HashMap<(String, i32), WorkflowDefinition>>,
}

impl InMemoryDefinitionService {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDefinitionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionService {
    async fn create(&self, definition: WorkflowDefinition) -> Result<(), DefinitionError> {
        let key = (definition.name.clone(), definition.version);
        let mut definitions = self.definitions.write();
        if definitions.contains_key(&key) {
            return Err(DefinitionError::DuplicateVersion(
                definition.name.clone(),
                definition.version,
            ));
        }
        if definition.is_active {
            for (k, existing) in definitions.iter_mut() {
                if k.0 == definition.name {
                    existing.is_active = false;
                }
            }
        }
        definitions.insert(key, definition);
        Ok(())
    }

    async fn get_active(&self, name: &str) -> Result<Option<WorkflowDefinition>, DefinitionError> {
        Ok(self
            .definitions
            .read()
            .values()
            .find(|d| d.name == name && d.is_active)
            .cloned())
    }

    async fn get_version(
        &self,
        name: &str,
        version: i32,
    ) -> Result<Option<WorkflowDefinition>, DefinitionError> {
        Ok(self
            .definitions
            .read()
            .get(&(name.to_string(), version))
            .cloned())
    }

    async fn get_by_id(&self, id: uuid::Uuid) -> Result<Option<WorkflowDefinition>, DefinitionError> {
        Ok(self.definitions.read().values().find(|d| d.id == id).cloned())
    }

    async fn set_active_version(&self, name: &str, version: i32) -> Result<(), DefinitionError> {
        let mut definitions = self.definitions.write();
        if !definitions.contains_key(&(name.to_string(), version)) {
            return Err(DefinitionError::NotFound(format!("{name} v{version}")));
        }
        for (k, def) in definitions.iter_mut() {
            if k.0 == name {
                def.is_active = k.1 == version;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DefinitionConfig;
    use uuid::Uuid;

    fn def(name: &str, version: i32, active: bool) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: name.into(),
            version,
            nodes: vec![],
            inputs: vec![],
            outputs: vec![],
            config: DefinitionConfig::default(),
            is_active: active,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn only_one_active_version_per_name() {
        let store = InMemoryDefinitionService::new();
        store.create(def("wf", 1, true)).await.unwrap();
        store.create(def("wf", 2, true)).await.unwrap();

        let active = store.get_active("wf").await.unwrap().unwrap();
        assert_eq!(active.version, 2);
        let v1 = store.get_version("wf", 1).await.unwrap().unwrap();
        assert!(!v1.is_active);
    }

    #[tokio::test]
    async fn duplicate_name_version_rejected() {
        let store = InMemoryDefinitionService::new();
        store.create(def("wf", 1, true)).await.unwrap();
        let err = store.create(def("wf", 1, false)).await.unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateVersion(_, 1)));
    }

    #[tokio::test]
    async fn set_active_version_switches() {
        let store = InMemoryDefinitionService::new();
        store.create(def("wf", 1, true)).await.unwrap();
        store.create(def("wf", 2, false)).await.unwrap();

        store.set_active_version("wf", 2).await.unwrap();
        assert!(!store.get_version("wf", 1).await.unwrap().unwrap().is_active);
        assert!(store.get_version("wf", 2).await.unwrap().unwrap().is_active);
    }
}
