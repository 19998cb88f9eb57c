//! Error taxonomy (spec §7).
//!
//! `OrchestratorError` is the shared error type handed back across crate
//! boundaries (queue, ledger, resilience). Each variant maps to one of the
//! classes in [`ErrorClass`] via [`OrchestratorError::class`], which is what
//! the worker runtime consults to decide whether to nack-with-retry or
//! nack-to-dlq.

use thiserror::Error;

/// Coarse error classification used to decide retry eligibility (spec §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection failures, timeouts, 5xx/429: retry via nack.
    InfrastructureTransient,
    /// 4xx (excluding 429), auth failure, schema mismatch: DLQ without
    /// further retry once classified.
    InfrastructurePermanent,
    /// `BudgetExceededError`: not retried within the day.
    Budget,
    /// `CircuitOpenError`: not retried by the breaker's owner.
    CircuitOpen,
    /// Handler returned `{status: "failed"}`: retried up to max_retries.
    HandlerBusiness,
    /// Duplicate inbox insertion, rejected before reaching the queue.
    Replay,
}

impl ErrorClass {
    /// Whether the worker runtime should route this error through the
    /// retry/backoff path (`nack`) rather than treating it as a terminal,
    /// non-retryable failure.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::InfrastructureTransient | ErrorClass::HandlerBusiness
        )
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("infrastructure error (transient): {0}")]
    InfrastructureTransient(String),

    #[error("infrastructure error (permanent): {0}")]
    InfrastructurePermanent(String),

    #[error("budget exceeded for provider {provider}: spent=${spent:.2}, budget=${budget:.2}, requested=${requested:.2}")]
    BudgetExceeded {
        provider: String,
        spent: f64,
        budget: f64,
        requested: f64,
    },

    #[error("circuit open for service {service}")]
    CircuitOpen { service: String },

    #[error("handler reported failure: {0}")]
    HandlerBusiness(String),

    #[error("replay detected for ({source}, {external_id})")]
    Replay { source: String, external_id: String },

    #[error("payload failed schema validation for task type {task_type}: {reason}")]
    SchemaValidation { task_type: String, reason: String },

    #[error("no handler registered for task type {0}")]
    UnknownTaskType(String),

    #[error("all providers failed: {0}")]
    AllProvidersFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            OrchestratorError::Transport(_)
            | OrchestratorError::InfrastructureTransient(_) => ErrorClass::InfrastructureTransient,
            OrchestratorError::InfrastructurePermanent(_)
            | OrchestratorError::SchemaValidation { .. }
            | OrchestratorError::UnknownTaskType(_) => ErrorClass::InfrastructurePermanent,
            OrchestratorError::BudgetExceeded { .. } => ErrorClass::Budget,
            OrchestratorError::CircuitOpen { .. } => ErrorClass::CircuitOpen,
            OrchestratorError::HandlerBusiness(_) | OrchestratorError::AllProvidersFailed(_) => {
                ErrorClass::HandlerBusiness
            }
            OrchestratorError::Replay { .. } => ErrorClass::Replay,
            OrchestratorError::Serialization(_) => ErrorClass::InfrastructurePermanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        let err = OrchestratorError::InfrastructureTransient("connection refused".into());
        assert!(err.is_retryable());
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        let err = OrchestratorError::InfrastructurePermanent("400 bad request".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn handler_business_failures_are_retryable_up_to_max_retries() {
        let err = OrchestratorError::HandlerBusiness("downstream rejected".into());
        assert_eq!(err.class(), ErrorClass::HandlerBusiness);
        assert!(err.is_retryable());
    }

    #[test]
    fn replay_is_not_retryable() {
        let err = OrchestratorError::Replay {
            source: "github".into(),
            external_id: "E-42".into(),
        };
        assert!(!err.is_retryable());
    }
}
