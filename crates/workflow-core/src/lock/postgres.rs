//! PostgreSQL `LockService`, grounded on `persistence/postgres.rs`'s
//! `claim_task` conditional-UPDATE idiom: a single statement that does the
//! compare-and-set inline rather than a read-then-write round trip, so the
//! database's own row lock provides the atomicity instead of an
//! application-level mutex.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use super::{validate_ttl, LockError, LockService};
use crate::domain::Lock;

#[derive(Clone)]
pub struct PostgresLockService {
    pool: PgPool,
}

impl PostgresLockService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockService for PostgresLockService {
    #[instrument(skip(self), fields(key = %key, owner_id = %owner_id))]
    async fn acquire(&self, key: &str, ttl: Duration, owner_id: &str) -> Result<bool, LockError> {
        validate_ttl(ttl)?;
        let ttl_seconds = ttl.as_secs() as f64;

        // `now()` is the database's wall clock, per SPEC_FULL.md §4.1: the
        // client never supplies a timestamp for the comparison.
        let row = sqlx::query(
            r#"
            INSERT INTO locks (key, owner_id, acquired_at, expires_at)
            VALUES ($1, $2, now(), now() + ($3 || ' seconds')::interval)
            ON CONFLICT (key) DO UPDATE
                SET owner_id = EXCLUDED.owner_id,
                    acquired_at = EXCLUDED.acquired_at,
                    expires_at = EXCLUDED.expires_at
                WHERE locks.expires_at <= now() OR locks.owner_id = EXCLUDED.owner_id
            RETURNING owner_id
            "#,
        )
        .bind(key)
        .bind(owner_id)
        .bind(ttl_seconds.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LockError::Database(e.to_string()))?;

        let acquired = row.is_some();
        debug!(acquired, "acquire attempt");
        Ok(acquired)
    }

    #[instrument(skip(self), fields(key = %key, owner_id = %owner_id))]
    async fn renew(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool, LockError> {
        validate_ttl(ttl)?;
        let ttl_seconds = ttl.as_secs() as f64;

        let row = sqlx::query(
            r#"
            UPDATE locks
            SET expires_at = now() + ($3 || ' seconds')::interval
            WHERE key = $1 AND owner_id = $2 AND expires_at > now()
            RETURNING owner_id
            "#,
        )
        .bind(key)
        .bind(owner_id)
        .bind(ttl_seconds.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LockError::Database(e.to_string()))?;

        Ok(row.is_some())
    }

    #[instrument(skip(self), fields(key = %key, owner_id = %owner_id))]
    async fn release(&self, key: &str, owner_id: &str) -> Result<(), LockError> {
        sqlx::query("DELETE FROM locks WHERE key = $1 AND owner_id = $2")
            .bind(key)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|e| LockError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Lock>, LockError> {
        let row = sqlx::query(
            "SELECT key, owner_id, acquired_at, expires_at FROM locks WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LockError::Database(e.to_string()))?;

        Ok(row.map(|r| Lock {
            key: r.get("key"),
            owner_id: r.get("owner_id"),
            acquired_at: r.get("acquired_at"),
            expires_at: r.get("expires_at"),
        }))
    }
}
