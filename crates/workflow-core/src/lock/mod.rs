//! Lock Service (C1): named leases backed by the database.
//!
//! Grounded on `reliability/distributed_circuit_breaker.rs`'s pattern of a
//! small local cache in front of a store-backed conditional update, and on
//! `persistence/postgres.rs`'s `claim_task`'s `FOR UPDATE SKIP LOCKED` /
//! conditional-UPDATE idiom for the actual acquire semantics. Unlike the
//! circuit breaker's cache (which exists purely to cut read volume), this
//! service has no local cache: SPEC_FULL.md §4.1 requires wall-clock time
//! to come from the database so clock skew between engines cannot matter,
//! which rules out trusting a locally cached expiry.

mod memory;
mod postgres;

pub use memory::InMemoryLockService;
pub use postgres::PostgresLockService;

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::Lock;

pub const MIN_TTL: Duration = Duration::from_secs(5);
pub const MAX_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("database error: {0}")]
    Database(String),
    #[error("invalid ttl: {0}")]
    InvalidTtl(String),
}

fn validate_ttl(ttl: Duration) -> Result<(), LockError> {
    if ttl < MIN_TTL || ttl > MAX_TTL {
        return Err(LockError::InvalidTtl(format!(
            "ttl must be between {MIN_TTL:?} and {MAX_TTL:?}, got {ttl:?}"
        )));
    }
    Ok(())
}

/// Named lease contract (SPEC_FULL.md §4.1). All three operations are
/// atomic with respect to other callers racing the same key.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Atomic insert-or-update-if-expired. Returns `true` iff the caller
    /// holds the lock afterwards. Contention (lock already held by someone
    /// else and unexpired) is a normal `false`, never an `Err`.
    async fn acquire(&self, key: &str, ttl: Duration, owner_id: &str) -> Result<bool, LockError>;

    /// Extends `expires_at` iff `owner_id` currently holds the lock.
    async fn renew(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Idempotent: only removes the row if `owner_id` matches; otherwise a
    /// no-op (another owner's lease, or no row at all).
    async fn release(&self, key: &str, owner_id: &str) -> Result<(), LockError>;

    /// Read-only snapshot, for diagnostics and property tests. Not part of
    /// the acquire/renew/release contract itself.
    async fn get(&self, key: &str) -> Result<Option<Lock>, LockError>;
}

/// RAII-ish helper: acquire a lock and make sure it's released even if the
/// caller returns early via `?`. Mirrors the `CircuitBreakerPermit` pattern
/// in `reliability/distributed_circuit_breaker.rs`, but the guard here
/// releases unconditionally on drop via an explicit `release().await` call
/// site rather than a sync `Drop`, since lock release is an async store op.
pub struct LockGuard<'a> {
    service: &'a dyn LockService,
    key: String,
    owner_id: String,
}

impl<'a> LockGuard<'a> {
    /// Try to acquire `key`; returns `None` if contended.
    pub async fn try_acquire(
        service: &'a dyn LockService,
        key: impl Into<String>,
        owner_id: impl Into<String>,
        ttl: Duration,
    ) -> Result<Option<Self>, LockError> {
        let key = key.into();
        let owner_id = owner_id.into();
        if service.acquire(&key, ttl, &owner_id).await? {
            Ok(Some(Self {
                service,
                key,
                owner_id,
            }))
        } else {
            Ok(None)
        }
    }

    pub async fn renew(&self, ttl: Duration) -> Result<bool, LockError> {
        self.service.renew(&self.key, &self.owner_id, ttl).await
    }

    pub async fn release(self) -> Result<(), LockError> {
        self.service.release(&self.key, &self.owner_id).await
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}
