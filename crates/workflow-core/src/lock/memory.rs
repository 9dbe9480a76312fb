//! In-memory `LockService`, for tests and single-process deployments.
//!
//! Grounded on `persistence/memory.rs`'s `RwLock<HashMap<...>>` pattern.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{validate_ttl, LockError, LockService};
use crate::domain::Lock;

pub struct InMemoryLockService {
    locks: RwLock<HashMap<String, Lock>>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryLockService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(&self, key: &str, ttl: Duration, owner_id: &str) -> Result<bool, LockError> {
        validate_ttl(ttl)?;
        let now = Utc::now();
        let mut locks = self.locks.write();
        match locks.get(key) {
            Some(existing) if !existing.is_expired(now) && existing.owner_id != owner_id => {
                Ok(false)
            }
            _ => {
                locks.insert(
                    key.to_string(),
                    Lock {
                        key: key.to_string(),
                        owner_id: owner_id.to_string(),
                        acquired_at: now,
                        expires_at: now
                            + chrono::Duration::from_std(ttl)
                                .map_err(|e| LockError::InvalidTtl(e.to_string()))?,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn renew(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool, LockError> {
        validate_ttl(ttl)?;
        let now = Utc::now();
        let mut locks = self.locks.write();
        match locks.get_mut(key) {
            Some(lock) if lock.owner_id == owner_id && !lock.is_expired(now) => {
                lock.expires_at = now
                    + chrono::Duration::from_std(ttl)
                        .map_err(|e| LockError::InvalidTtl(e.to_string()))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, owner_id: &str) -> Result<(), LockError> {
        let mut locks = self.locks.write();
        if let Some(lock) = locks.get(key) {
            if lock.owner_id == owner_id {
                locks.remove(key);
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Lock>, LockError> {
        Ok(self.locks.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mutual_exclusion_across_owners() {
        let svc = InMemoryLockService::new();
        assert!(svc.acquire("k", Duration::from_secs(10), "a").await.unwrap());
        assert!(!svc.acquire("k", Duration::from_secs(10), "b").await.unwrap());
    }

    #[tokio::test]
    async fn renew_requires_current_owner() {
        let svc = InMemoryLockService::new();
        svc.acquire("k", Duration::from_secs(10), "a").await.unwrap();
        assert!(!svc.renew("k", "b", Duration::from_secs(10)).await.unwrap());
        assert!(svc.renew("k", "a", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn release_is_idempotent_and_owner_checked() {
        let svc = InMemoryLockService::new();
        svc.acquire("k", Duration::from_secs(10), "a").await.unwrap();
        svc.release("k", "b").await.unwrap(); // no-op, wrong owner
        assert!(svc.get("k").await.unwrap().is_some());
        svc.release("k", "a").await.unwrap();
        assert!(svc.get("k").await.unwrap().is_none());
        svc.release("k", "a").await.unwrap(); // idempotent
    }

    #[tokio::test]
    async fn acquire_after_expiry_succeeds_for_new_owner() {
        let svc = InMemoryLockService::new();
        svc.acquire("k", Duration::from_secs(5), "a").await.unwrap();
        {
            let mut locks = svc.locks.write();
            locks.get_mut("k").unwrap().expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
        assert!(svc.acquire("k", Duration::from_secs(5), "b").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_out_of_range_ttl() {
        let svc = InMemoryLockService::new();
        assert!(svc.acquire("k", Duration::from_secs(1), "a").await.is_err());
        assert!(svc
            .acquire("k", Duration::from_secs(1000), "a")
            .await
            .is_err());
    }
}
