//! Engine cluster membership rows.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an `EngineInstance` registry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Active,
    Inactive,
    Maintenance,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineStatus::Active => "active",
            EngineStatus::Inactive => "inactive",
            EngineStatus::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

/// Small typed load snapshot, so the Scheduler's `argmin(load)` selection
/// (SPEC_FULL.md §4.5) doesn't need to parse an opaque blob at selection
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadInfo {
    pub current_load: u32,
    pub max_capacity: u32,
}

impl LoadInfo {
    pub fn idle(max_capacity: u32) -> Self {
        Self {
            current_load: 0,
            max_capacity,
        }
    }

    /// Fraction of capacity in use, in [0.0, 1.0+); used as the argmin key.
    pub fn utilization(&self) -> f64 {
        if self.max_capacity == 0 {
            return f64::INFINITY;
        }
        self.current_load as f64 / self.max_capacity as f64
    }
}

/// A member of the engine cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInstance {
    pub instance_id: Uuid,
    pub hostname: String,
    pub process_id: u32,
    pub status: EngineStatus,
    pub load_info: LoadInfo,
    pub supported_executors: Vec<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub last_heartbeat: chrono::DateTime<chrono::Utc>,
}

impl EngineInstance {
    pub fn supports_all(&self, executors: &[String]) -> bool {
        executors
            .iter()
            .all(|e| self.supported_executors.iter().any(|s| s == e))
    }

    pub fn supports_count(&self, executors: &[String]) -> usize {
        executors
            .iter()
            .filter(|e| self.supported_executors.iter().any(|s| s == *e))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_of_idle_engine_is_zero() {
        let load = LoadInfo::idle(10);
        assert_eq!(load.utilization(), 0.0);
    }

    #[test]
    fn zero_capacity_is_infinitely_loaded() {
        let load = LoadInfo {
            current_load: 0,
            max_capacity: 0,
        };
        assert!(load.utilization().is_infinite());
    }

    #[test]
    fn supports_all_checks_superset() {
        let engine = EngineInstance {
            instance_id: Uuid::now_v7(),
            hostname: "h".into(),
            process_id: 1,
            status: EngineStatus::Active,
            load_info: LoadInfo::idle(4),
            supported_executors: vec!["http".into(), "shell".into()],
            started_at: chrono::Utc::now(),
            last_heartbeat: chrono::Utc::now(),
        };
        assert!(engine.supports_all(&["http".to_string()]));
        assert!(!engine.supports_all(&["http".to_string(), "email".to_string()]));
        assert_eq!(engine.supports_count(&["http".to_string(), "email".to_string()]), 1);
    }
}
