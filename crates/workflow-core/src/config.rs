//! Engine-wide operational configuration.
//!
//! Mirrors `TelemetryConfig::from_env()` in spirit: a typed struct with
//! sensible defaults, constructible directly or from `WORKFLOW_*`
//! environment variables, validated eagerly so a misconfigured deployment
//! fails at startup rather than degrading at runtime.

use std::env;
use std::time::Duration;

/// Errors raised by `EngineConfig` construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Typed configuration surface covering every operational knob in
/// SPEC_FULL.md §6.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub heartbeat_interval_seconds: u64,
    pub liveness_window_seconds: u64,
    pub scheduler_sweep_seconds: u64,
    pub instance_lock_ttl_seconds: u64,
    pub mutex_lock_ttl_seconds: u64,
    pub max_loop_iterations: u32,
    pub default_max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 30,
            liveness_window_seconds: 120,
            scheduler_sweep_seconds: 30,
            instance_lock_ttl_seconds: 60,
            mutex_lock_ttl_seconds: 300,
            max_loop_iterations: 1000,
            default_max_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Build configuration from the process environment, falling back to
    /// `Default` for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(v) = env::var("WORKFLOW_HEARTBEAT_INTERVAL_SECONDS") {
            config.heartbeat_interval_seconds = parse_u64("WORKFLOW_HEARTBEAT_INTERVAL_SECONDS", &v)?;
        }
        if let Ok(v) = env::var("WORKFLOW_LIVENESS_WINDOW_SECONDS") {
            config.liveness_window_seconds = parse_u64("WORKFLOW_LIVENESS_WINDOW_SECONDS", &v)?;
        }
        if let Ok(v) = env::var("WORKFLOW_SCHEDULER_SWEEP_SECONDS") {
            config.scheduler_sweep_seconds = parse_u64("WORKFLOW_SCHEDULER_SWEEP_SECONDS", &v)?;
        }
        if let Ok(v) = env::var("WORKFLOW_INSTANCE_LOCK_TTL_SECONDS") {
            config.instance_lock_ttl_seconds = parse_u64("WORKFLOW_INSTANCE_LOCK_TTL_SECONDS", &v)?;
        }
        if let Ok(v) = env::var("WORKFLOW_MUTEX_LOCK_TTL_SECONDS") {
            config.mutex_lock_ttl_seconds = parse_u64("WORKFLOW_MUTEX_LOCK_TTL_SECONDS", &v)?;
        }
        if let Ok(v) = env::var("WORKFLOW_MAX_LOOP_ITERATIONS") {
            config.max_loop_iterations = parse_u32("WORKFLOW_MAX_LOOP_ITERATIONS", &v)?;
        }
        if let Ok(v) = env::var("WORKFLOW_DEFAULT_MAX_RETRIES") {
            config.default_max_retries = parse_u32("WORKFLOW_DEFAULT_MAX_RETRIES", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants. Called automatically by `from_env`;
    /// callers constructing a config by hand should call this too.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.liveness_window_seconds < 3 * self.heartbeat_interval_seconds {
            return Err(ConfigError::Invalid {
                field: "liveness_window_seconds",
                message: format!(
                    "must be at least 3x heartbeat_interval_seconds ({} < 3 * {})",
                    self.liveness_window_seconds, self.heartbeat_interval_seconds
                ),
            });
        }
        if self.instance_lock_ttl_seconds < 5 || self.instance_lock_ttl_seconds > 600 {
            return Err(ConfigError::Invalid {
                field: "instance_lock_ttl_seconds",
                message: "must be between 5 and 600 seconds".into(),
            });
        }
        if self.mutex_lock_ttl_seconds < 5 || self.mutex_lock_ttl_seconds > 600 {
            return Err(ConfigError::Invalid {
                field: "mutex_lock_ttl_seconds",
                message: "must be between 5 and 600 seconds".into(),
            });
        }
        if self.max_loop_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "max_loop_iterations",
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_seconds)
    }

    pub fn scheduler_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_sweep_seconds)
    }

    pub fn instance_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.instance_lock_ttl_seconds)
    }

    pub fn mutex_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.mutex_lock_ttl_seconds)
    }
}

fn parse_u64(field: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        field,
        message: format!("`{raw}` is not a valid u64"),
    })
}

fn parse_u32(field: &'static str, raw: &str) -> Result<u32, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        field,
        message: format!("`{raw}` is not a valid u32"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = EngineConfig::default();
        assert_eq!(config.heartbeat_interval_seconds, 30);
        assert_eq!(config.liveness_window_seconds, 120);
        assert_eq!(config.max_loop_iterations, 1000);
        assert_eq!(config.default_max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_liveness_window_too_small() {
        let mut config = EngineConfig::default();
        config.liveness_window_seconds = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_loop_cap() {
        let mut config = EngineConfig::default();
        config.max_loop_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_ttl() {
        let mut config = EngineConfig::default();
        config.instance_lock_ttl_seconds = 3;
        assert!(config.validate().is_err());
    }
}
