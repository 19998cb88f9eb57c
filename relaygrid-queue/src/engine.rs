//! Queue Engine contract (spec §4.1).
//!
//! One trait, two implementations: [`crate::redis_engine::RedisQueueEngine`]
//! for production and [`crate::memory::InMemoryQueueEngine`] for tests that
//! don't want a live Redis. Both are exercised by the same contract tests in
//! `tests/contract.rs` so behavior cannot drift between them.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaygrid_core::{MessageId, OrchestratorError, QueueMessage, TaskId, TaskPriority};

/// Result of [`QueueEngine::enqueue`]: whether the message was newly
/// published, or an existing idempotency key already covered it (spec §4.1
/// `enqueue`: a duplicate submission returns the original message id rather
/// than a generic no-op signal).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(MessageId),
    Duplicate(MessageId),
}

impl EnqueueOutcome {
    pub fn message_id(&self) -> &MessageId {
        match self {
            EnqueueOutcome::Enqueued(id) | EnqueueOutcome::Duplicate(id) => id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueOutcome::Duplicate(_))
    }
}

impl fmt::Display for EnqueueOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message_id())
    }
}

/// A claimed delivery: the message plus the handle needed to ack/nack/extend
/// it. Mirrors the `(message_id, lease)` pair handed back by the teacher's
/// `RuntimeRepository::list_dispatchable_attempts` + `upsert_lease` pairing,
/// collapsed into one dequeue call the way `queue_v2.py`'s `dequeue` does.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub message_id: MessageId,
    pub message: QueueMessage,
    pub consumer: String,
    pub delivered_at: DateTime<Utc>,
}

/// Point-in-time queue depth/backlog snapshot (spec §6 `MetricsSnapshot`
/// subset owned by the queue engine).
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueMetrics {
    pub queue_depth: u64,
    pub pending_count: u64,
    pub dlq_depth: u64,
    pub active_leases: u64,
}

#[async_trait]
pub trait QueueEngine: Send + Sync {
    /// Publishes a new task. If `idempotency_key` is `Some` and a key with
    /// the same value was enqueued within the configured TTL, this is a
    /// no-op that returns the original message id as
    /// [`EnqueueOutcome::Duplicate`] rather than appending a new message
    /// (spec §4.1 `enqueue`, §8 invariant: idempotent submission).
    async fn enqueue(
        &self,
        message: QueueMessage,
        idempotency_key: Option<&str>,
    ) -> Result<EnqueueOutcome, OrchestratorError>;

    /// Claims up to one message for `consumer` via the queue's consumer
    /// group, making it invisible to other consumers for `visibility_timeout`
    /// or until `ack`/`nack`. Returns `Ok(None)` on an empty queue after
    /// `block_for`.
    async fn dequeue(
        &self,
        consumer: &str,
        block_for: std::time::Duration,
        visibility_timeout: std::time::Duration,
    ) -> Result<Option<Delivery>, OrchestratorError>;

    /// Commits successful processing: removes the message from the stream
    /// and releases its lease.
    async fn ack(&self, message_id: &MessageId) -> Result<(), OrchestratorError>;

    /// Commits a failed attempt. Increments `retry_count`; if it now exceeds
    /// `max_retries` the message is moved to the dead-letter queue instead of
    /// being redelivered (spec §4.1 `nack`, §8 invariant: bounded retries).
    async fn nack(
        &self,
        message_id: &MessageId,
        error: &str,
        max_retries: u32,
    ) -> Result<(), OrchestratorError>;

    /// Refreshes a lease's visibility deadline. Fails if `consumer` is not
    /// the current lease holder (spec §4.1 `extend_lease`).
    async fn extend_lease(
        &self,
        message_id: &MessageId,
        consumer: &str,
        visibility_timeout: std::time::Duration,
    ) -> Result<(), OrchestratorError>;

    /// Re-delivers messages whose lease has expired without an ack/nack,
    /// reassigning them to a reclaimer consumer (spec §4.1
    /// `reclaim_expired`, §8 invariant: no message is lost to a crashed
    /// worker).
    async fn reclaim_expired(
        &self,
        visibility_timeout: std::time::Duration,
    ) -> Result<Vec<MessageId>, OrchestratorError>;

    async fn metrics(&self) -> Result<QueueMetrics, OrchestratorError>;

    /// Re-enqueues up to `max` messages sitting in the dead-letter queue onto
    /// the main stream, resetting `retry_count` and, if `lower_priority` is
    /// set, demoting `priority` one step. Returns the number of messages
    /// moved (spec §4.1 `drain_dlq(max, lower_priority?)`).
    async fn drain_dlq(
        &self,
        max: usize,
        lower_priority: bool,
    ) -> Result<usize, OrchestratorError>;

    /// Acquires an advisory per-task lock, guarding against a reclaimed
    /// lease and the still-running original attempt dispatching the same
    /// task twice. Returns `false` without blocking if `holder` already
    /// holds, or another holder currently holds, the lock.
    async fn acquire_task_lock(
        &self,
        task_id: TaskId,
        holder: &str,
        ttl: std::time::Duration,
    ) -> Result<bool, OrchestratorError>;

    /// Releases the advisory lock, but only if `holder` is still the current
    /// holder (a lock that expired and was re-acquired by someone else must
    /// not be released out from under them).
    async fn release_task_lock(
        &self,
        task_id: TaskId,
        holder: &str,
    ) -> Result<(), OrchestratorError>;
}

/// `"{now_ms}:{priority}"`-style score used by the advisory priority index.
/// Lower score sorts first; priority dominates, recency breaks ties within a
/// priority tier. Never consulted by `dequeue` itself — the stream's FIFO
/// order is the sole dispatch path (see SPEC_FULL.md's resolution of the
/// priority-vs-FIFO open question).
pub fn priority_score(priority: TaskPriority, enqueued_at: DateTime<Utc>) -> f64 {
    let tier = priority as i64 as f64;
    let recency = enqueued_at.timestamp_millis() as f64 / 1e13;
    tier + recency
}
