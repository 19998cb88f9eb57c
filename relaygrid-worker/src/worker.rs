//! Dispatch loop (spec §4.2 Worker Runtime), grounded on
//! `orchestrator/worker.py`'s `Worker` class — semaphore-bounded
//! concurrency, a background lease-heartbeat per in-flight task, and a
//! shutdown event that stops new dequeues but lets in-flight work drain —
//! and on `WorkerBuilder`'s construction style from the
//! `durable-runtime` crate's `WorkerBuilder`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relaygrid_core::{RunRecord, RunStatus, Task, TaskStatus};
use relaygrid_queue::QueueEngine;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn, Instrument};

use crate::observer::{NoopObserver, RunObserver};
use crate::registry::HandlerRegistry;
use crate::retry::{run_with_retry, InnerRetryConfig};

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub max_concurrency: usize,
    pub visibility_timeout: Duration,
    pub max_retries: u32,
    pub heartbeat_interval: Duration,
    pub dequeue_block: Duration,
    pub inner_retry: InnerRetryConfig,
    /// Upper bound on how long `run()` waits for in-flight tasks to finish
    /// after shutdown is requested before forcibly aborting them.
    pub drain_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            visibility_timeout: Duration::from_secs(300),
            max_retries: 5,
            heartbeat_interval: Duration::from_secs(150),
            dequeue_block: Duration::from_secs(5),
            inner_retry: InnerRetryConfig::default(),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&relaygrid_core::OrchestratorConfig> for WorkerConfig {
    fn from(cfg: &relaygrid_core::OrchestratorConfig) -> Self {
        Self {
            max_concurrency: cfg.max_concurrency,
            visibility_timeout: cfg.visibility_timeout,
            max_retries: cfg.max_retries,
            heartbeat_interval: cfg.visibility_timeout / 2,
            dequeue_block: Duration::from_secs(5),
            inner_retry: InnerRetryConfig {
                max_attempts: 6,
                backoff_base: cfg.backoff_base,
                backoff_max: cfg.backoff_max,
            },
            drain_timeout: Duration::from_secs(30),
        }
    }
}

pub struct WorkerBuilder {
    id: Option<String>,
    queue: Option<Arc<dyn QueueEngine>>,
    registry: Option<Arc<HandlerRegistry>>,
    observer: Arc<dyn RunObserver>,
    config: WorkerConfig,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            queue: None,
            registry: None,
            observer: Arc::new(NoopObserver),
            config: WorkerConfig::default(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn queue(mut self, queue: Arc<dyn QueueEngine>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Worker {
        Worker {
            id: self.id.unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4())),
            queue: self.queue.expect("WorkerBuilder requires a queue"),
            registry: self.registry.expect("WorkerBuilder requires a handler registry"),
            observer: self.observer,
            config: self.config,
            semaphore: Arc::new(Semaphore::new(0)),
            shutdown: Arc::new(Notify::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Worker {
    id: String,
    queue: Arc<dyn QueueEngine>,
    registry: Arc<HandlerRegistry>,
    observer: Arc<dyn RunObserver>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
    shutdown: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
}

impl Worker {
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::new()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Signals the run loop to stop claiming new work. In-flight tasks are
    /// allowed to finish (spec §5 graceful shutdown).
    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Main dispatch loop (spec §4.2 `run`). Returns once shutdown has been
    /// requested and every in-flight task has drained.
    #[instrument(skip(self), fields(worker_id = %self.id))]
    pub async fn run(self: Arc<Self>) {
        self.semaphore.add_permits(self.config.max_concurrency);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }

            let dequeued = tokio::select! {
                res = self.queue.dequeue(&self.id, self.config.dequeue_block, self.config.visibility_timeout) => res,
                _ = self.shutdown.notified() => break,
            };

            match dequeued {
                Ok(Some(delivery)) => {
                    let worker = self.clone();
                    in_flight.spawn(
                        async move { worker.process_task(delivery).await }
                            .in_current_span(),
                    );
                }
                Ok(None) => continue,
                Err(err) => {
                    error!(%err, "dequeue failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }

            // Reap completed attempts without blocking the loop.
            while in_flight.try_join_next().is_some() {}
        }

        info!("shutdown requested, draining in-flight tasks");
        if tokio::time::timeout(self.config.drain_timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await
        .is_err()
        {
            warn!("drain timeout exceeded, aborting remaining in-flight tasks");
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
        info!("drain complete");
    }

    #[instrument(skip(self, delivery), fields(task_id = %delivery.message.task_id, task_type = %delivery.message.task_type))]
    async fn process_task(self: Arc<Self>, delivery: relaygrid_queue::Delivery) {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let lock_holder = self.id.clone();
        let got_lock = match self
            .queue
            .acquire_task_lock(delivery.message.task_id, &lock_holder, self.config.visibility_timeout)
            .await
        {
            Ok(got) => got,
            Err(err) => {
                error!(%err, "task lock acquisition failed");
                false
            }
        };
        if !got_lock {
            warn!(task_id = %delivery.message.task_id, "task already locked by another attempt, skipping dispatch");
            return;
        }

        let message = delivery.message;
        let task = Task {
            id: message.task_id,
            task_type: message.task_type.clone(),
            payload: message.payload.clone(),
            priority: message.priority,
            status: TaskStatus::Running,
            trace_id: None,
            idempotency_key: None,
            created_at: message.created_at,
            metadata: Default::default(),
            retry_count: message.retry_count,
            last_error: message.last_error.clone(),
        };

        let attempt = message.retry_count + 1;
        let mut run = RunRecord::start(task.id, attempt);
        self.observer.on_run_started(&run).await;
        self.observer
            .on_task_status(task.id, TaskStatus::Running, task.retry_count, None)
            .await;

        let heartbeat = self.spawn_heartbeat(delivery.message_id.clone(), delivery.consumer.clone());

        let outcome = run_with_retry(self.config.inner_retry, || self.registry.dispatch(&task)).await;

        heartbeat.abort();

        match outcome {
            Ok(result) => {
                if let Err(err) = self.queue.ack(&delivery.message_id).await {
                    error!(%err, "ack failed after successful run");
                }
                run.metrics.insert("result".to_string(), result);
                run.finish(RunStatus::Success, None);
                self.observer.on_run_finished(&run).await;
                self.observer
                    .on_task_status(task.id, TaskStatus::Done, task.retry_count, None)
                    .await;
            }
            Err(err) => {
                warn!(%err, "task attempt failed");
                let error_message = err.to_string();
                if let Err(nack_err) = self
                    .queue
                    .nack(&delivery.message_id, &error_message, self.config.max_retries)
                    .await
                {
                    error!(%nack_err, "nack failed after failed run");
                }
                let exhausted = task.retry_count + 1 > self.config.max_retries;
                let final_status = if exhausted {
                    TaskStatus::Failed
                } else {
                    TaskStatus::Queued
                };
                run.finish(
                    RunStatus::Failed,
                    Some(serde_json::json!({ "error": error_message })),
                );
                self.observer.on_run_finished(&run).await;
                self.observer
                    .on_task_status(task.id, final_status, task.retry_count + 1, Some(&error_message))
                    .await;
            }
        }

        if let Err(err) = self.queue.release_task_lock(task.id, &lock_holder).await {
            error!(%err, "task lock release failed");
        }
    }

    fn spawn_heartbeat(
        &self,
        message_id: relaygrid_core::MessageId,
        consumer: String,
    ) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let interval = self.config.heartbeat_interval;
        let visibility_timeout = self.config.visibility_timeout;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(err) = queue
                    .extend_lease(&message_id, &consumer, visibility_timeout)
                    .await
                {
                    warn!(%err, "lease heartbeat failed");
                }
            }
        })
    }
}

/// Reclaims messages whose lease expired without a heartbeat (spec §4.2
/// periodic maintenance, grounded on `LeaseManager::tick` in the teacher's
/// `runtime/lease.rs`). Run this on its own interval alongside `Worker::run`.
pub async fn reclaim_tick(
    queue: &dyn QueueEngine,
    visibility_timeout: Duration,
) -> Result<usize, relaygrid_core::OrchestratorError> {
    let reclaimed = queue.reclaim_expired(visibility_timeout).await?;
    Ok(reclaimed.len())
}
