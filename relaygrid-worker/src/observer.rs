//! Hook the worker calls on run/task transitions, so it never needs a
//! direct dependency on `relaygrid-ledger` — the binary wires a ledger-backed
//! observer at startup the way `worker.py`'s `mark_task_success`/
//! `mark_task_failed` write through to Supabase.

use async_trait::async_trait;
use relaygrid_core::{RunRecord, TaskId, TaskStatus};

#[async_trait]
pub trait RunObserver: Send + Sync {
    async fn on_run_started(&self, run: &RunRecord);
    async fn on_run_finished(&self, run: &RunRecord);
    async fn on_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        retry_count: u32,
        last_error: Option<&str>,
    );
}

pub struct NoopObserver;

#[async_trait]
impl RunObserver for NoopObserver {
    async fn on_run_started(&self, _run: &RunRecord) {}
    async fn on_run_finished(&self, _run: &RunRecord) {}
    async fn on_task_status(
        &self,
        _task_id: TaskId,
        _status: TaskStatus,
        _retry_count: u32,
        _last_error: Option<&str>,
    ) {
    }
}
