//! Redis Streams-backed [`QueueEngine`] (spec §4.1, §6 transport = Redis
//! Streams).
//!
//! Grounded directly on `shared/queue_v2.py`'s `EnhancedQueue`: a stream
//! (`tasks:stream`) read through a consumer group for at-least-once
//! delivery, a per-message lease key (`lease:{id}`) that stands in for
//! Redis's own PEL idle time so `extend_lease` can assert ownership, a
//! sorted-set priority index (`tasks:priority`) that is advisory only, and a
//! parallel dead-letter stream (`tasks:dlq`) for attempts that exhaust
//! retries.

use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use relaygrid_core::{MessageId, OrchestratorError, QueueMessage, TaskId};
use tracing::{debug, instrument, warn};

use crate::engine::{priority_score, Delivery, EnqueueOutcome, QueueEngine, QueueMetrics};

const STREAM_KEY: &str = "relaygrid:tasks:stream";
const DLQ_KEY: &str = "relaygrid:tasks:dlq";
const PRIORITY_ZSET: &str = "relaygrid:tasks:priority";
const GROUP: &str = "relaygrid-workers";
const RECLAIMER_CONSUMER: &str = "reclaimer";
const FIELD: &str = "data";

fn idempotency_key(key: &str) -> String {
    format!("relaygrid:idempotency:{key}")
}

fn lease_key(message_id: &str) -> String {
    format!("relaygrid:lease:{message_id}")
}

fn task_lock_key(task_id: &TaskId) -> String {
    format!("relaygrid:tasklock:{task_id}")
}

#[derive(Clone)]
pub struct RedisQueueEngine {
    conn: ConnectionManager,
}

impl RedisQueueEngine {
    pub async fn connect(redis_url: &str) -> Result<Self, OrchestratorError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| OrchestratorError::InfrastructurePermanent(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        let mut engine = Self { conn };
        engine.ensure_group().await?;
        Ok(engine)
    }

    async fn ensure_group(&mut self) -> Result<(), OrchestratorError> {
        let created: redis::RedisResult<()> = self
            .conn
            .xgroup_create_mkstream(STREAM_KEY, GROUP, "0")
            .await;
        if let Err(err) = created {
            if !err.to_string().contains("BUSYGROUP") {
                return Err(OrchestratorError::InfrastructureTransient(err.to_string()));
            }
        }
        Ok(())
    }

    fn backoff_for(retry_count: u32) -> Duration {
        let secs = 2u64.saturating_pow(retry_count).min(60);
        Duration::from_secs(secs)
    }
}

#[async_trait::async_trait]
impl QueueEngine for RedisQueueEngine {
    #[instrument(skip(self, message))]
    async fn enqueue(
        &self,
        message: QueueMessage,
        idempotency_key_val: Option<&str>,
    ) -> Result<EnqueueOutcome, OrchestratorError> {
        let mut conn = self.conn.clone();

        // Claim the lock with a sentinel before publishing, the same way the
        // original exists-then-set sequence closed the concurrent-duplicate
        // race; the sentinel is overwritten with the real stream id below so
        // later lookups return something a caller can actually use.
        let lock_key = idempotency_key_val.map(idempotency_key);
        if let Some(lock_key) = &lock_key {
            let won: bool = redis::cmd("SET")
                .arg(lock_key)
                .arg("pending")
                .arg("NX")
                .arg("EX")
                .arg(86_400)
                .query_async::<_, Option<String>>(&mut conn)
                .await
                .map(|v| v.is_some())
                .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
            if !won {
                let existing: Option<String> = conn
                    .get(lock_key)
                    .await
                    .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
                let existing_id = existing.unwrap_or_else(|| "pending".to_string());
                debug!(idempotency_key = idempotency_key_val, "duplicate enqueue suppressed");
                return Ok(EnqueueOutcome::Duplicate(MessageId::from(existing_id)));
            }
        }

        let payload = serde_json::to_string(&message)?;
        let id: String = conn
            .xadd(STREAM_KEY, "*", &[(FIELD, payload)])
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;

        let _: () = conn
            .zadd(
                PRIORITY_ZSET,
                message.task_id.to_string(),
                priority_score(message.priority, Utc::now()),
            )
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;

        if let Some(lock_key) = &lock_key {
            let _: () = conn
                .set_ex(lock_key, &id, 86_400)
                .await
                .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        }

        Ok(EnqueueOutcome::Enqueued(MessageId::from(id)))
    }

    #[instrument(skip(self))]
    async fn dequeue(
        &self,
        consumer: &str,
        block_for: Duration,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, OrchestratorError> {
        let mut conn = self.conn.clone();
        let opts = redis::streams::StreamReadOptions::default()
            .group(GROUP, consumer)
            .count(1)
            .block(block_for.as_millis() as usize);

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[STREAM_KEY], &[">"], &opts)
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;

        let Some(stream) = reply.keys.into_iter().next() else {
            return Ok(None);
        };
        let Some(entry) = stream.ids.into_iter().next() else {
            return Ok(None);
        };

        let raw: String = entry
            .map
            .get(FIELD)
            .and_then(|v| redis::FromRedisValue::from_redis_value(v).ok())
            .ok_or_else(|| {
                OrchestratorError::InfrastructurePermanent(format!(
                    "stream entry {} missing field {FIELD}",
                    entry.id
                ))
            })?;
        let message: QueueMessage = serde_json::from_str(&raw)?;

        let lease_payload = serde_json::json!({
            "consumer": consumer,
            "acquired_at": Utc::now(),
        });
        let _: () = conn
            .set_ex(
                lease_key(&entry.id),
                lease_payload.to_string(),
                visibility_timeout.as_secs(),
            )
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;

        Ok(Some(Delivery {
            message_id: MessageId::from(entry.id),
            message,
            consumer: consumer.to_string(),
            delivered_at: Utc::now(),
        }))
    }

    #[instrument(skip(self))]
    async fn ack(&self, message_id: &MessageId) -> Result<(), OrchestratorError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .xack(STREAM_KEY, GROUP, &[message_id.0.as_str()])
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        let _: () = conn
            .xdel(STREAM_KEY, &[message_id.0.as_str()])
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        let _: () = conn
            .del(lease_key(&message_id.0))
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn nack(
        &self,
        message_id: &MessageId,
        error: &str,
        max_retries: u32,
    ) -> Result<(), OrchestratorError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamRangeReply = conn
            .xrange(STREAM_KEY, &message_id.0, &message_id.0)
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;

        let Some(entry) = reply.ids.into_iter().next() else {
            warn!(message_id = %message_id, "nack for message no longer in stream");
            return Ok(());
        };
        let raw: String = entry
            .map
            .get(FIELD)
            .and_then(|v| redis::FromRedisValue::from_redis_value(v).ok())
            .ok_or_else(|| {
                OrchestratorError::InfrastructurePermanent(format!(
                    "stream entry {} missing field {FIELD}",
                    entry.id
                ))
            })?;
        let mut message: QueueMessage = serde_json::from_str(&raw)?;
        message.retry_count += 1;
        message.last_error = Some(error.to_string());
        message.last_retry_at = Some(Utc::now());

        if message.retry_count > max_retries {
            message.final_error = Some(error.to_string());
            message.moved_to_dlq_at = Some(Utc::now());
            let dlq_payload = serde_json::to_string(&message)?;
            let _: () = conn
                .xadd(DLQ_KEY, "*", &[(FIELD, dlq_payload)])
                .await
                .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
            self.ack(message_id).await?;
            return Ok(());
        }

        self.ack(message_id).await?;
        tokio::time::sleep(Self::backoff_for(message.retry_count)).await;
        let payload = serde_json::to_string(&message)?;
        let _: () = conn
            .xadd(STREAM_KEY, "*", &[(FIELD, payload)])
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn extend_lease(
        &self,
        message_id: &MessageId,
        consumer: &str,
        visibility_timeout: Duration,
    ) -> Result<(), OrchestratorError> {
        let mut conn = self.conn.clone();
        let key = lease_key(&message_id.0);
        let current: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        let Some(current) = current else {
            return Err(OrchestratorError::InfrastructurePermanent(format!(
                "no lease held for message {message_id}"
            )));
        };
        let held: serde_json::Value = serde_json::from_str(&current)?;
        if held.get("consumer").and_then(|v| v.as_str()) != Some(consumer) {
            return Err(OrchestratorError::InfrastructurePermanent(format!(
                "consumer {consumer} does not hold lease for {message_id}"
            )));
        }
        let refreshed = serde_json::json!({ "consumer": consumer, "acquired_at": Utc::now() });
        let _: () = conn
            .set_ex(&key, refreshed.to_string(), visibility_timeout.as_secs())
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reclaim_expired(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Vec<MessageId>, OrchestratorError> {
        let mut conn = self.conn.clone();
        let min_idle_ms = visibility_timeout.as_millis() as usize;

        let pending: redis::streams::StreamPendingCountReply = conn
            .xpending_count(STREAM_KEY, GROUP, "-", "+", 1000)
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;

        let mut reclaimed = Vec::new();
        for entry in pending.ids {
            if (entry.idle as usize) < min_idle_ms {
                continue;
            }
            let lease_present: bool = conn
                .exists(lease_key(&entry.id))
                .await
                .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
            if lease_present {
                continue;
            }
            let _: redis::streams::StreamClaimReply = conn
                .xclaim(
                    STREAM_KEY,
                    GROUP,
                    RECLAIMER_CONSUMER,
                    min_idle_ms,
                    &[entry.id.clone()],
                )
                .await
                .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
            reclaimed.push(MessageId::from(entry.id));
        }
        Ok(reclaimed)
    }

    #[instrument(skip(self))]
    async fn metrics(&self) -> Result<QueueMetrics, OrchestratorError> {
        let mut conn = self.conn.clone();
        let queue_depth: u64 = conn
            .xlen(STREAM_KEY)
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        let dlq_depth: u64 = conn
            .xlen(DLQ_KEY)
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        let pending: redis::streams::StreamPendingReply = conn
            .xpending(STREAM_KEY, GROUP)
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        let pending_count = match pending {
            redis::streams::StreamPendingReply::Data(data) => data.count as u64,
            redis::streams::StreamPendingReply::Empty => 0,
        };
        let lease_keys: Vec<String> = conn
            .keys("relaygrid:lease:*")
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        Ok(QueueMetrics {
            queue_depth,
            pending_count,
            dlq_depth,
            active_leases: lease_keys.len() as u64,
        })
    }

    #[instrument(skip(self))]
    async fn drain_dlq(
        &self,
        max: usize,
        lower_priority: bool,
    ) -> Result<usize, OrchestratorError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamRangeReply = conn
            .xrange_all(DLQ_KEY)
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;

        let mut drained = 0usize;
        for entry in reply.ids.into_iter().take(max) {
            let raw: String = entry
                .map
                .get(FIELD)
                .and_then(|v| redis::FromRedisValue::from_redis_value(v).ok())
                .ok_or_else(|| {
                    OrchestratorError::InfrastructurePermanent(format!(
                        "dlq entry {} missing field {FIELD}",
                        entry.id
                    ))
                })?;
            let mut message: QueueMessage = serde_json::from_str(&raw)?;
            message.retry_count = 0;
            if lower_priority {
                message.priority = message.priority.demote();
            }
            message.drained_from_dlq_at = Some(Utc::now());
            message.final_error = None;
            message.moved_to_dlq_at = None;

            let payload = serde_json::to_string(&message)?;
            let _: () = conn
                .xadd(STREAM_KEY, "*", &[(FIELD, payload)])
                .await
                .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
            let _: () = conn
                .xdel(DLQ_KEY, &[entry.id.as_str()])
                .await
                .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
            drained += 1;
        }
        Ok(drained)
    }

    #[instrument(skip(self))]
    async fn acquire_task_lock(
        &self,
        task_id: TaskId,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, OrchestratorError> {
        let mut conn = self.conn.clone();
        let key = task_lock_key(&task_id);
        let won: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(holder)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        Ok(won.is_some())
    }

    #[instrument(skip(self))]
    async fn release_task_lock(
        &self,
        task_id: TaskId,
        holder: &str,
    ) -> Result<(), OrchestratorError> {
        let mut conn = self.conn.clone();
        let key = task_lock_key(&task_id);
        let current: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        if current.as_deref() == Some(holder) {
            let _: () = conn
                .del(&key)
                .await
                .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        }
        Ok(())
    }
}
