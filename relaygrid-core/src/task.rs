//! Data model (spec §3): Task, Queue Message, Lease, Run Record, Inbox/Outbox
//! entries, Budget Row, Circuit Breaker Row, API Key.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{RunId, TaskId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Lower numeric value sorts first in the advisory priority index.
    Critical = 1,
    High = 10,
    Normal = 100,
    Low = 1000,
}

impl TaskPriority {
    /// CRITICAL→HIGH→NORMAL→LOW; LOW stays (spec §4.1 `drain_dlq`).
    pub fn demote(self) -> Self {
        match self {
            TaskPriority::Critical => TaskPriority::High,
            TaskPriority::High => TaskPriority::Normal,
            TaskPriority::Normal | TaskPriority::Low => TaskPriority::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "normal" => Ok(TaskPriority::Normal),
            "low" => Ok(TaskPriority::Low),
            other => Err(format!("unknown priority {other}")),
        }
    }
}

/// Task lifecycle (spec §3): transitions only forward, terminal states are
/// sticky.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }

    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Queued, Running) => true,
            (Running, Done | Failed | Canceled) => true,
            (Queued, Canceled) => true,
            (same, other) if same == other => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            "canceled" => Ok(TaskStatus::Canceled),
            other => Err(format!("unknown task status {other}")),
        }
    }
}

/// Immutable-after-submission task record (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Value,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub trace_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metadata: HashMap<String, Value>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            payload,
            priority: TaskPriority::Normal,
            status: TaskStatus::Queued,
            trace_id: None,
            idempotency_key: None,
            created_at: Utc::now(),
            metadata: HashMap::new(),
            retry_count: 0,
            last_error: None,
        }
    }

    /// Applies a forward status transition; returns `false` (without
    /// mutating) if the requested transition is not legal from the current
    /// state. Terminal states are sticky.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }
}

/// One execution attempt (spec §3 Run Record).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    Success,
    Failed,
    Timeout,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Started)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
            RunStatus::Canceled => "canceled",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(RunStatus::Started),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "timeout" => Ok(RunStatus::Timeout),
            "canceled" => Ok(RunStatus::Canceled),
            other => Err(format!("unknown run status {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub attempt: u32,
    pub metrics: HashMap<String, Value>,
    pub error_details: Option<Value>,
}

impl RunRecord {
    pub fn start(task_id: TaskId, attempt: u32) -> Self {
        Self {
            id: RunId::new(),
            task_id,
            started_at: Utc::now(),
            ended_at: None,
            status: RunStatus::Started,
            attempt,
            metrics: HashMap::new(),
            error_details: None,
        }
    }

    /// Monotonic status transition (spec §3, §8 invariant 1): `ended_at` is
    /// set iff the new status is terminal.
    pub fn finish(&mut self, status: RunStatus, error_details: Option<Value>) {
        debug_assert!(status.is_terminal(), "finish() requires a terminal status");
        self.status = status;
        self.ended_at = Some(Utc::now());
        self.error_details = error_details;
    }
}

/// Ephemeral wrapper carried on the wire for one queue delivery attempt
/// (spec §3 Queue Message, §6 wire format).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueMessage {
    pub task_id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Value,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub final_error: Option<String>,
    pub moved_to_dlq_at: Option<DateTime<Utc>>,
    pub drained_from_dlq_at: Option<DateTime<Utc>>,
}

impl QueueMessage {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            payload: task.payload.clone(),
            priority: task.priority,
            status: TaskStatus::Queued,
            retry_count: 0,
            created_at: task.created_at,
            last_error: None,
            last_retry_at: None,
            final_error: None,
            moved_to_dlq_at: None,
            drained_from_dlq_at: None,
        }
    }
}

/// Replay-defense row keyed by `(source, external_id)` (spec §3 Inbox Entry).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    Received,
    Accepted,
    Rejected,
}

impl InboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InboxStatus::Received => "received",
            InboxStatus::Accepted => "accepted",
            InboxStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for InboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(InboxStatus::Received),
            "accepted" => Ok(InboxStatus::Accepted),
            "rejected" => Ok(InboxStatus::Rejected),
            other => Err(format!("unknown inbox status {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboxEntry {
    pub source: String,
    pub external_id: String,
    pub signature_hash: String,
    pub received_at: DateTime<Utc>,
    pub status: InboxStatus,
    pub rejection_reason: Option<String>,
}

/// Intent to emit an external effect (spec §3 Outbox Entry).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "delivered" => Ok(OutboxStatus::Delivered),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: uuid::Uuid,
    pub status: OutboxStatus,
    pub target: String,
    pub payload: Value,
    pub delivery_attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// Per `(provider, date)` spend tracking row (spec §3 Budget Row).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BudgetRow {
    pub provider: String,
    pub date: chrono::NaiveDate,
    pub budget_usd: f64,
    pub spent_usd: f64,
    pub token_count: i64,
    pub request_count: i64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" => Ok(CircuitState::HalfOpen),
            other => Err(format!("unknown circuit state {other}")),
        }
    }
}

/// Per-service breaker row (spec §3 Circuit Breaker Row).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitBreakerRow {
    pub service: String,
    pub state: CircuitState,
    pub opened_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub error_rate: f64,
    pub metadata: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApiKeyRole {
    Admin,
    Service,
    Readonly,
}

impl ApiKeyRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiKeyRole::Admin => "ADMIN",
            ApiKeyRole::Service => "SERVICE",
            ApiKeyRole::Readonly => "READONLY",
        }
    }
}

impl std::str::FromStr for ApiKeyRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(ApiKeyRole::Admin),
            "SERVICE" => Ok(ApiKeyRole::Service),
            "READONLY" => Ok(ApiKeyRole::Readonly),
            other => Err(format!("unknown api key role {other}")),
        }
    }
}

/// Hashed API key row (spec §3 API Key). The raw key is never stored; only
/// its hash is, and comparison against a presented key must be
/// constant-time (see `relaygrid-ingress::auth`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: uuid::Uuid,
    pub key_hash: String,
    pub role: ApiKeyRole,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_transitions_are_forward_only() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Done));
        assert!(!TaskStatus::Done.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Queued));
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut task = Task::new("echo", serde_json::json!({}));
        assert!(task.transition(TaskStatus::Running));
        assert!(task.transition(TaskStatus::Done));
        assert!(!task.transition(TaskStatus::Running));
        assert_eq!(task.status, TaskStatus::Done);
    }

    #[test]
    fn priority_demotion_floors_at_low() {
        assert_eq!(TaskPriority::Critical.demote(), TaskPriority::High);
        assert_eq!(TaskPriority::High.demote(), TaskPriority::Normal);
        assert_eq!(TaskPriority::Normal.demote(), TaskPriority::Low);
        assert_eq!(TaskPriority::Low.demote(), TaskPriority::Low);
    }

    #[test]
    fn run_record_finish_sets_ended_at() {
        let mut run = RunRecord::start(TaskId::new(), 1);
        assert!(run.ended_at.is_none());
        run.finish(RunStatus::Success, None);
        assert!(run.ended_at.is_some());
        assert_eq!(run.status, RunStatus::Success);
    }
}
