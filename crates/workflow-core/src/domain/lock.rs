//! The `Lock` data row managed by the Lock Service (`crate::lock`).

use serde::{Deserialize, Serialize};

/// A single named lease row. At most one unexpired row may exist for a
/// given `key` at any instant (SPEC_FULL.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lock {
    pub key: String,
    pub owner_id: String,
    pub acquired_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl Lock {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expires_at <= now
    }
}
