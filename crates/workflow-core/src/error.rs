//! Crate-wide error taxonomy.
//!
//! Every component exposes its own narrow error enum (`LockError`,
//! `RegistryError`, `StoreError`, `ExecutorError`, ...); this module defines
//! the surface taxonomy from SPEC_FULL.md §7 that callers outside the
//! component boundaries actually match on, plus `From` conversions that
//! fold the narrow errors into it.

use std::fmt;

/// Coarse error surface a caller can branch on without matching every leaf
/// variant of `EngineError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before persistence; never retried.
    Validation,
    /// Mutex violation, optimistic concurrency mismatch, duplicate registration.
    Conflict,
    /// Unknown definition / instance / engine.
    NotFound,
    /// Database connectivity or serialization failure; retryable.
    TransientStore,
    /// An executor reported failure.
    ExecutorFailure,
    /// Invariant violated; the engine should self-disable.
    Fatal,
}

/// Crate-root error type realizing the SPEC_FULL.md §7 taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient store error: {0}")]
    TransientStore(String),

    #[error("executor failure: {0}")]
    ExecutorFailure(String),

    #[error("fatal engine error: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::TransientStore(_) => ErrorKind::TransientStore,
            EngineError::ExecutorFailure(_) => ErrorKind::ExecutorFailure,
            EngineError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether a failure of this kind is eligible for the workflow-level
    /// retry/backoff path (SPEC_FULL.md §4.7: only ExecutorFailure and
    /// TransientStore do).
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ExecutorFailure | ErrorKind::TransientStore
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TransientStore => "transient_store",
            ErrorKind::ExecutorFailure => "executor_failure",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

impl From<crate::lock::LockError> for EngineError {
    fn from(e: crate::lock::LockError) -> Self {
        match e {
            crate::lock::LockError::Database(m) => EngineError::TransientStore(m),
            crate::lock::LockError::InvalidTtl(m) => EngineError::Validation(m),
        }
    }
}

impl From<crate::store::StoreError> for EngineError {
    fn from(e: crate::store::StoreError) -> Self {
        match e {
            crate::store::StoreError::NotFound(m) => EngineError::NotFound(m),
            crate::store::StoreError::ConcurrencyConflict { .. } => {
                EngineError::Conflict(e.to_string())
            }
            crate::store::StoreError::InvalidTransition { .. } => {
                EngineError::Validation(e.to_string())
            }
            crate::store::StoreError::Database(m) => EngineError::TransientStore(m),
            crate::store::StoreError::Serialization(m) => EngineError::TransientStore(m),
        }
    }
}

impl From<crate::cluster::RegistryError> for EngineError {
    fn from(e: crate::cluster::RegistryError) -> Self {
        match e {
            crate::cluster::RegistryError::AlreadyRegistered(m) => EngineError::Conflict(m),
            crate::cluster::RegistryError::NotFound(m) => EngineError::NotFound(m),
            crate::cluster::RegistryError::Database(m) => EngineError::TransientStore(m),
        }
    }
}

impl From<crate::executor::ExecutorError> for EngineError {
    fn from(e: crate::executor::ExecutorError) -> Self {
        match e {
            crate::executor::ExecutorError::NotFound(m) => EngineError::Validation(m),
            crate::executor::ExecutorError::Retryable(m) => EngineError::ExecutorFailure(m),
            // An executor-declared non-retryable failure must not re-enter
            // the run loop's retry path (engine/mod.rs), so it cannot fold
            // into ExecutorFailure like its retryable sibling.
            crate::executor::ExecutorError::NonRetryable(m) => EngineError::Fatal(m),
        }
    }
}

impl From<crate::expr::ExprError> for EngineError {
    fn from(e: crate::expr::ExprError) -> Self {
        EngineError::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_matches_spec_surface() {
        assert!(EngineError::ExecutorFailure("x".into()).retryable());
        assert!(EngineError::TransientStore("x".into()).retryable());
        assert!(!EngineError::Validation("x".into()).retryable());
        assert!(!EngineError::Conflict("x".into()).retryable());
        assert!(!EngineError::NotFound("x".into()).retryable());
        assert!(!EngineError::Fatal("x".into()).retryable());
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(ErrorKind::TransientStore.to_string(), "transient_store");
        assert_eq!(ErrorKind::ExecutorFailure.to_string(), "executor_failure");
    }

    #[test]
    fn non_retryable_executor_error_does_not_retry() {
        let retryable: EngineError = crate::executor::ExecutorError::Retryable("x".into()).into();
        assert!(retryable.retryable());

        let non_retryable: EngineError =
            crate::executor::ExecutorError::NonRetryable("x".into()).into();
        assert!(!non_retryable.retryable());
        assert!(matches!(non_retryable, EngineError::Fatal(_)));
    }
}
