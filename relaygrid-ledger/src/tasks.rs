//! Durable task record store (spec §4.4), grounded on the `enqueue_attempt`
//! / row-mapping style of `postgres_runtime_repository.rs`.
//!
//! This table is the audit-and-query record of a task, not its dispatch
//! queue — `relaygrid-queue` owns visibility and redelivery. A task row is
//! written once at submission and updated in place as its status advances.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use relaygrid_core::{Task, TaskPriority, TaskStatus};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    task_type: String,
    payload: serde_json::Value,
    priority: String,
    status: String,
    trace_id: Option<String>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    metadata: serde_json::Value,
    retry_count: i32,
    last_error: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = String;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: relaygrid_core::TaskId(row.id),
            task_type: row.task_type,
            payload: row.payload,
            priority: TaskPriority::from_str(&row.priority)?,
            status: TaskStatus::from_str(&row.status)?,
            trace_id: row.trace_id,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            metadata: serde_json::from_value(row.metadata).unwrap_or_default(),
            retry_count: row.retry_count as u32,
            last_error: row.last_error,
        })
    }
}

pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, task: &Task) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO relaygrid_tasks
                (id, task_type, payload, priority, status, trace_id, idempotency_key,
                 created_at, metadata, retry_count, last_error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(task.id.0)
        .bind(&task.task_type)
        .bind(&task.payload)
        .bind(task.priority.as_str())
        .bind(task.status.as_str())
        .bind(&task.trace_id)
        .bind(&task.idempotency_key)
        .bind(task.created_at)
        .bind(serde_json::to_value(&task.metadata).unwrap_or_default())
        .bind(task.retry_count as i32)
        .bind(&task.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: relaygrid_core::TaskId) -> Result<Option<Task>, sqlx::Error> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM relaygrid_tasks WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| Task::try_from(r).ok()))
    }

    pub async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Task>, sqlx::Error> {
        let row: Option<TaskRow> =
            sqlx::query_as("SELECT * FROM relaygrid_tasks WHERE idempotency_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|r| Task::try_from(r).ok()))
    }

    /// Writes a new status, retry count, and error, without checking that
    /// the transition is legal — callers are expected to have validated
    /// via [`relaygrid_core::TaskStatus::can_transition_to`] first.
    pub async fn update_status(
        &self,
        id: relaygrid_core::TaskId,
        status: TaskStatus,
        retry_count: u32,
        last_error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE relaygrid_tasks SET status = $2, retry_count = $3, last_error = $4 WHERE id = $1",
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(retry_count as i32)
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Same as [`Self::update_status`] but executed against an already-open
    /// transaction, so it commits atomically with whatever else the caller
    /// is writing in the same transaction (e.g. an outbox insert).
    pub async fn update_status_in_txn(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        id: relaygrid_core::TaskId,
        status: TaskStatus,
        retry_count: u32,
        last_error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE relaygrid_tasks SET status = $2, retry_count = $3, last_error = $4 WHERE id = $1",
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(retry_count as i32)
        .bind(last_error)
        .execute(&mut **txn)
        .await?;
        Ok(())
    }

    pub async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, sqlx::Error> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM relaygrid_tasks WHERE status = $1 ORDER BY created_at")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().filter_map(|r| Task::try_from(r).ok()).collect())
    }

    pub async fn count_by_status(&self, status: TaskStatus) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT count(*) AS c FROM relaygrid_tasks WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("c"))
    }
}
