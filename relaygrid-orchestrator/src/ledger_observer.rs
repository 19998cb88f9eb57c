//! Writes worker run/task transitions through to the durable ledger,
//! grounded on `orchestrator/worker.py`'s `mark_task_success`/
//! `mark_task_failed` (there: Redis + Supabase; here: Postgres only, since
//! the queue engine already owns the Redis-side state).

use std::sync::Arc;

use async_trait::async_trait;
use relaygrid_core::{RunRecord, TaskId, TaskStatus};
use relaygrid_ledger::{OutboxRepository, RunRepository, TaskRepository};
use relaygrid_worker::RunObserver;
use sqlx::PgPool;
use tracing::error;

pub struct LedgerObserver {
    runs: Arc<RunRepository>,
    tasks: Arc<TaskRepository>,
    outbox: Arc<OutboxRepository>,
    pool: PgPool,
}

impl LedgerObserver {
    pub fn new(
        runs: Arc<RunRepository>,
        tasks: Arc<TaskRepository>,
        outbox: Arc<OutboxRepository>,
        pool: PgPool,
    ) -> Self {
        Self { runs, tasks, outbox, pool }
    }
}

#[async_trait]
impl RunObserver for LedgerObserver {
    async fn on_run_started(&self, run: &RunRecord) {
        if let Err(err) = self.runs.insert(run).await {
            error!(%err, run_id = %run.id, "failed to persist run start");
        }
    }

    async fn on_run_finished(&self, run: &RunRecord) {
        if let Err(err) = self.runs.finish(run).await {
            error!(%err, run_id = %run.id, "failed to persist run completion");
        }
    }

    /// Writes the task's new status and, when that status is terminal,
    /// records an outbox entry in the same transaction (spec §4.4 Outbox
    /// invariant) so a downstream notifier can pick up "task finished"
    /// without a second, un-transacted write racing the status update.
    async fn on_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        retry_count: u32,
        last_error: Option<&str>,
    ) {
        if !status.is_terminal() {
            if let Err(err) = self
                .tasks
                .update_status(task_id, status, retry_count, last_error)
                .await
            {
                error!(%err, %task_id, "failed to persist task status");
            }
            return;
        }

        let mut txn = match self.pool.begin().await {
            Ok(txn) => txn,
            Err(err) => {
                error!(%err, %task_id, "failed to open transaction for task status");
                return;
            }
        };

        if let Err(err) = self
            .tasks
            .update_status_in_txn(&mut txn, task_id, status, retry_count, last_error)
            .await
        {
            error!(%err, %task_id, "failed to persist task status");
            return;
        }

        let payload = serde_json::json!({
            "task_id": task_id.to_string(),
            "status": status.as_str(),
            "retry_count": retry_count,
            "last_error": last_error,
        });
        if let Err(err) = self
            .outbox
            .insert_in_txn(&mut txn, "task_status_changed", payload)
            .await
        {
            error!(%err, %task_id, "failed to enqueue task status outbox entry");
            return;
        }

        if let Err(err) = txn.commit().await {
            error!(%err, %task_id, "failed to commit task status transaction");
        }
    }
}
