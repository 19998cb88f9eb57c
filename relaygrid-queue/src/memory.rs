//! In-memory [`QueueEngine`] used by unit tests and local development
//! without a live Redis, mirroring the shared-contract-test pattern the
//! teacher uses to compare its Postgres and Sqlite runtime repositories
//! against the same trait.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use relaygrid_core::{MessageId, OrchestratorError, QueueMessage, TaskId};

use crate::engine::{Delivery, EnqueueOutcome, QueueEngine, QueueMetrics};

struct Entry {
    id: u64,
    message: QueueMessage,
    lease: Option<(String, chrono::DateTime<Utc>)>,
}

struct TaskLock {
    holder: String,
    expires_at: chrono::DateTime<Utc>,
}

struct State {
    next_id: u64,
    stream: VecDeque<Entry>,
    dlq: VecDeque<Entry>,
    idempotency_keys: HashMap<String, MessageId>,
    task_locks: HashMap<TaskId, TaskLock>,
}

/// Single-process fake: one internal `VecDeque` stands in for the Redis
/// stream, a second for the DLQ. Good enough to exercise worker/ledger logic
/// in tests without Docker.
pub struct InMemoryQueueEngine {
    state: Mutex<State>,
}

impl Default for InMemoryQueueEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                stream: VecDeque::new(),
                dlq: VecDeque::new(),
                idempotency_keys: HashMap::new(),
                task_locks: HashMap::new(),
            }),
        }
    }
}

impl InMemoryQueueEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl QueueEngine for InMemoryQueueEngine {
    async fn enqueue(
        &self,
        message: QueueMessage,
        idempotency_key: Option<&str>,
    ) -> Result<EnqueueOutcome, OrchestratorError> {
        let mut state = self.state.lock().unwrap();
        if let Some(key) = idempotency_key {
            if let Some(existing) = state.idempotency_keys.get(key) {
                return Ok(EnqueueOutcome::Duplicate(existing.clone()));
            }
        }
        let id = state.next_id;
        state.next_id += 1;
        let message_id = MessageId::from(id.to_string());
        if let Some(key) = idempotency_key {
            state
                .idempotency_keys
                .insert(key.to_string(), message_id.clone());
        }
        state.stream.push_back(Entry {
            id,
            message,
            lease: None,
        });
        Ok(EnqueueOutcome::Enqueued(message_id))
    }

    async fn dequeue(
        &self,
        consumer: &str,
        _block_for: Duration,
        _visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, OrchestratorError> {
        let mut state = self.state.lock().unwrap();
        let entry = state.stream.iter_mut().find(|e| e.lease.is_none());
        match entry {
            Some(entry) => {
                entry.lease = Some((consumer.to_string(), Utc::now()));
                Ok(Some(Delivery {
                    message_id: MessageId::from(entry.id.to_string()),
                    message: entry.message.clone(),
                    consumer: consumer.to_string(),
                    delivered_at: Utc::now(),
                }))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, message_id: &MessageId) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().unwrap();
        state.stream.retain(|e| e.id.to_string() != message_id.0);
        Ok(())
    }

    async fn nack(
        &self,
        message_id: &MessageId,
        error: &str,
        max_retries: u32,
    ) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.stream.iter().position(|e| e.id.to_string() == message_id.0) else {
            return Ok(());
        };
        let mut entry = state.stream.remove(pos).unwrap();
        entry.message.retry_count += 1;
        entry.message.last_error = Some(error.to_string());
        entry.message.last_retry_at = Some(Utc::now());
        entry.lease = None;

        if entry.message.retry_count > max_retries {
            entry.message.final_error = Some(error.to_string());
            entry.message.moved_to_dlq_at = Some(Utc::now());
            state.dlq.push_back(entry);
        } else {
            state.stream.push_back(entry);
        }
        Ok(())
    }

    async fn extend_lease(
        &self,
        message_id: &MessageId,
        consumer: &str,
        _visibility_timeout: Duration,
    ) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .stream
            .iter_mut()
            .find(|e| e.id.to_string() == message_id.0)
            .ok_or_else(|| {
                OrchestratorError::InfrastructurePermanent(format!(
                    "no lease held for message {message_id}"
                ))
            })?;
        match &entry.lease {
            Some((holder, _)) if holder == consumer => {
                entry.lease = Some((consumer.to_string(), Utc::now()));
                Ok(())
            }
            _ => Err(OrchestratorError::InfrastructurePermanent(format!(
                "consumer {consumer} does not hold lease for {message_id}"
            ))),
        }
    }

    async fn reclaim_expired(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Vec<MessageId>, OrchestratorError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let mut reclaimed = Vec::new();
        for entry in state.stream.iter_mut() {
            if let Some((_, acquired_at)) = entry.lease {
                let idle = now.signed_duration_since(acquired_at);
                if idle.to_std().unwrap_or_default() >= visibility_timeout {
                    entry.lease = None;
                    reclaimed.push(MessageId::from(entry.id.to_string()));
                }
            }
        }
        Ok(reclaimed)
    }

    async fn metrics(&self) -> Result<QueueMetrics, OrchestratorError> {
        let state = self.state.lock().unwrap();
        let pending_count = state.stream.iter().filter(|e| e.lease.is_some()).count() as u64;
        Ok(QueueMetrics {
            queue_depth: state.stream.len() as u64,
            pending_count,
            dlq_depth: state.dlq.len() as u64,
            active_leases: pending_count,
        })
    }

    async fn drain_dlq(
        &self,
        max: usize,
        lower_priority: bool,
    ) -> Result<usize, OrchestratorError> {
        let mut state = self.state.lock().unwrap();
        let mut drained = 0usize;
        while drained < max {
            let Some(mut entry) = state.dlq.pop_front() else {
                break;
            };
            entry.message.retry_count = 0;
            if lower_priority {
                entry.message.priority = entry.message.priority.demote();
            }
            entry.message.drained_from_dlq_at = Some(Utc::now());
            entry.message.final_error = None;
            entry.message.moved_to_dlq_at = None;
            entry.lease = None;
            state.next_id += 1;
            entry.id = state.next_id;
            state.stream.push_back(entry);
            drained += 1;
        }
        Ok(drained)
    }

    async fn acquire_task_lock(
        &self,
        task_id: TaskId,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, OrchestratorError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        if let Some(lock) = state.task_locks.get(&task_id) {
            if lock.expires_at > now {
                return Ok(false);
            }
        }
        state.task_locks.insert(
            task_id,
            TaskLock {
                holder: holder.to_string(),
                expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
            },
        );
        Ok(true)
    }

    async fn release_task_lock(
        &self,
        task_id: TaskId,
        holder: &str,
    ) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().unwrap();
        if let Some(lock) = state.task_locks.get(&task_id) {
            if lock.holder == holder {
                state.task_locks.remove(&task_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygrid_core::Task;

    fn sample_message() -> QueueMessage {
        let task = Task::new("echo", serde_json::json!({"msg": "hi"}));
        QueueMessage::from_task(&task)
    }

    #[tokio::test]
    async fn enqueue_dequeue_ack_round_trip() {
        let engine = InMemoryQueueEngine::new();
        engine.enqueue(sample_message(), None).await.unwrap();
        let delivery = engine
            .dequeue(
                "worker-1",
                Duration::from_millis(10),
                Duration::from_secs(30),
            )
            .await
            .unwrap()
            .expect("message available");
        engine.ack(&delivery.message_id).await.unwrap();
        let metrics = engine.metrics().await.unwrap();
        assert_eq!(metrics.queue_depth, 0);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_suppressed() {
        let engine = InMemoryQueueEngine::new();
        let first = engine
            .enqueue(sample_message(), Some("key-1"))
            .await
            .unwrap();
        let second = engine
            .enqueue(sample_message(), Some("key-1"))
            .await
            .unwrap();
        assert!(matches!(first, EnqueueOutcome::Enqueued(_)));
        assert!(matches!(second, EnqueueOutcome::Duplicate(_)));
        assert_eq!(first.message_id(), second.message_id());
    }

    #[tokio::test]
    async fn nack_beyond_max_retries_moves_to_dlq() {
        let engine = InMemoryQueueEngine::new();
        engine.enqueue(sample_message(), None).await.unwrap();
        let delivery = engine
            .dequeue(
                "worker-1",
                Duration::from_millis(10),
                Duration::from_secs(30),
            )
            .await
            .unwrap()
            .unwrap();
        engine
            .nack(&delivery.message_id, "boom", 0)
            .await
            .unwrap();
        let metrics = engine.metrics().await.unwrap();
        assert_eq!(metrics.queue_depth, 0);
        assert_eq!(metrics.dlq_depth, 1);
    }

    #[tokio::test]
    async fn nack_within_retry_budget_requeues() {
        let engine = InMemoryQueueEngine::new();
        engine.enqueue(sample_message(), None).await.unwrap();
        let delivery = engine
            .dequeue(
                "worker-1",
                Duration::from_millis(10),
                Duration::from_secs(30),
            )
            .await
            .unwrap()
            .unwrap();
        engine
            .nack(&delivery.message_id, "transient", 5)
            .await
            .unwrap();
        let metrics = engine.metrics().await.unwrap();
        assert_eq!(metrics.queue_depth, 1);
        assert_eq!(metrics.dlq_depth, 0);
    }

    #[tokio::test]
    async fn extend_lease_rejects_wrong_consumer() {
        let engine = InMemoryQueueEngine::new();
        engine.enqueue(sample_message(), None).await.unwrap();
        let delivery = engine
            .dequeue(
                "worker-1",
                Duration::from_millis(10),
                Duration::from_secs(30),
            )
            .await
            .unwrap()
            .unwrap();
        let result = engine
            .extend_lease(&delivery.message_id, "worker-2", Duration::from_secs(30))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reclaim_expired_frees_stale_leases() {
        let engine = InMemoryQueueEngine::new();
        engine.enqueue(sample_message(), None).await.unwrap();
        engine
            .dequeue(
                "worker-1",
                Duration::from_millis(10),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        let reclaimed = engine
            .reclaim_expired(Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        let redelivered = engine
            .dequeue(
                "worker-2",
                Duration::from_millis(10),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        assert!(redelivered.is_some());
    }

    #[tokio::test]
    async fn drain_dlq_demotes_priority_and_resets_retries() {
        let engine = InMemoryQueueEngine::new();
        engine.enqueue(sample_message(), None).await.unwrap();
        let delivery = engine
            .dequeue(
                "worker-1",
                Duration::from_millis(10),
                Duration::from_secs(30),
            )
            .await
            .unwrap()
            .unwrap();
        engine.nack(&delivery.message_id, "boom", 0).await.unwrap();
        let drained = engine.drain_dlq(100, true).await.unwrap();
        assert_eq!(drained, 1);
        let metrics = engine.metrics().await.unwrap();
        assert_eq!(metrics.queue_depth, 1);
        assert_eq!(metrics.dlq_depth, 0);
    }
}
