//! Shared data model, error taxonomy, and configuration surface for the
//! relaygrid task orchestration core.
//!
//! This crate has no I/O of its own: it defines the wire/ledger shapes that
//! [`relaygrid-queue`], [`relaygrid-ledger`], [`relaygrid-resilience`], and
//! [`relaygrid-worker`] all share, so that none of them need to depend on
//! each other for type definitions.

pub mod config;
pub mod error;
pub mod ids;
pub mod task;
pub mod time;

pub use config::OrchestratorConfig;
pub use error::{ErrorClass, OrchestratorError};
pub use ids::{MessageId, RunId, TaskId};
pub use task::{
    ApiKeyRecord, ApiKeyRole, BudgetRow, CircuitBreakerRow, CircuitState, InboxEntry,
    InboxStatus, OutboxEntry, OutboxStatus, QueueMessage, RunRecord, RunStatus, Task,
    TaskPriority, TaskStatus,
};
