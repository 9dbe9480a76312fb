use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{EngineRegistry, RegistryError};
use crate::domain::{EngineInstance, EngineStatus, LoadInfo};

pub struct InMemoryEngineRegistry {
    engines: RwLock<HashMap<Uuid, EngineInstance>>,
}

impl InMemoryEngineRegistry {
    pub fn new() -> Self {
        Self {
            engines: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryEngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineRegistry for InMemoryEngineRegistry {
    async fn register(&self, mut engine: EngineInstance) -> Result<(), RegistryError> {
        engine.status = EngineStatus::Active;
        engine.last_heartbeat = Utc::now();
        self.engines.write().insert(engine.instance_id, engine);
        Ok(())
    }

    async fn heartbeat(&self, instance_id: Uuid, load: LoadInfo) -> Result<bool, RegistryError> {
        let mut engines = self.engines.write();
        match engines.get_mut(&instance_id) {
            Some(engine) => {
                engine.last_heartbeat = Utc::now();
                engine.load_info = load;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_active(
        &self,
        liveness_window: chrono::Duration,
    ) -> Result<Vec<EngineInstance>, RegistryError> {
        let now = Utc::now();
        Ok(self
            .engines
            .read()
            .values()
            .filter(|e| e.status == EngineStatus::Active && now - e.last_heartbeat <= liveness_window)
            .cloned()
            .collect())
    }

    async fn list_stale(
        &self,
        threshold: chrono::Duration,
    ) -> Result<Vec<EngineInstance>, RegistryError> {
        let now = Utc::now();
        Ok(self
            .engines
            .read()
            .values()
            .filter(|e| e.status == EngineStatus::Active && now - e.last_heartbeat >= threshold)
            .cloned()
            .collect())
    }

    async fn mark_inactive(&self, instance_id: Uuid) -> Result<(), RegistryError> {
        if let Some(engine) = self.engines.write().get_mut(&instance_id) {
            engine.status = EngineStatus::Inactive;
        }
        Ok(())
    }

    async fn unregister(&self, instance_id: Uuid) -> Result<(), RegistryError> {
        self.engines.write().remove(&instance_id);
        Ok(())
    }

    async fn get(&self, instance_id: Uuid) -> Result<Option<EngineInstance>, RegistryError> {
        Ok(self.engines.read().get(&instance_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LoadInfo;

    fn sample(id: Uuid) -> EngineInstance {
        EngineInstance {
            instance_id: id,
            hostname: "h".into(),
            process_id: 1,
            status: EngineStatus::Active,
            load_info: LoadInfo::idle(4),
            supported_executors: vec!["noop".into()],
            started_at: Utc::now(),
            last_heartbeat: Utc::now(),
        }
    }

    #[tokio::test]
    async fn heartbeat_on_unregistered_engine_returns_false() {
        let reg = InMemoryEngineRegistry::new();
        assert!(!reg.heartbeat(Uuid::now_v7(), LoadInfo::idle(1)).await.unwrap());
    }

    #[tokio::test]
    async fn stale_detection_uses_threshold() {
        let reg = InMemoryEngineRegistry::new();
        let id = Uuid::now_v7();
        reg.register(sample(id)).await.unwrap();
        {
            let mut engines = reg.engines.write();
            engines.get_mut(&id).unwrap().last_heartbeat = Utc::now() - chrono::Duration::seconds(200);
        }
        let stale = reg.list_stale(chrono::Duration::seconds(120)).await.unwrap();
        assert_eq!(stale.len(), 1);
        let active = reg.list_active(chrono::Duration::seconds(120)).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn mark_inactive_excludes_from_active_and_stale() {
        let reg = InMemoryEngineRegistry::new();
        let id = Uuid::now_v7();
        reg.register(sample(id)).await.unwrap();
        reg.mark_inactive(id).await.unwrap();
        assert!(reg.list_active(chrono::Duration::seconds(120)).await.unwrap().is_empty());
        assert!(reg.list_stale(chrono::Duration::seconds(0)).await.unwrap().is_empty());
    }
}
