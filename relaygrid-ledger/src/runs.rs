//! Run record store (spec §3 Run Record, §4.4).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use relaygrid_core::{RunId, RunRecord, RunStatus, TaskId};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(FromRow)]
struct RunRow {
    id: Uuid,
    task_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    status: String,
    attempt: i32,
    metrics: serde_json::Value,
    error_details: Option<serde_json::Value>,
}

impl TryFrom<RunRow> for RunRecord {
    type Error = String;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(RunRecord {
            id: RunId(row.id),
            task_id: TaskId(row.task_id),
            started_at: row.started_at,
            ended_at: row.ended_at,
            status: RunStatus::from_str(&row.status)?,
            attempt: row.attempt as u32,
            metrics: serde_json::from_value(row.metrics).unwrap_or_default(),
            error_details: row.error_details,
        })
    }
}

pub struct RunRepository {
    pool: PgPool,
}

impl RunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, run: &RunRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO relaygrid_runs
                (id, task_id, started_at, ended_at, status, attempt, metrics, error_details)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(run.id.0)
        .bind(run.task_id.0)
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(run.status.as_str())
        .bind(run.attempt as i32)
        .bind(serde_json::to_value(&run.metrics).unwrap_or_default())
        .bind(&run.error_details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finish(&self, run: &RunRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE relaygrid_runs SET ended_at = $2, status = $3, error_details = $4, metrics = $5
             WHERE id = $1",
        )
        .bind(run.id.0)
        .bind(run.ended_at)
        .bind(run.status.as_str())
        .bind(&run.error_details)
        .bind(serde_json::to_value(&run.metrics).unwrap_or_default())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_task(&self, task_id: TaskId) -> Result<Vec<RunRecord>, sqlx::Error> {
        let rows: Vec<RunRow> = sqlx::query_as(
            "SELECT * FROM relaygrid_runs WHERE task_id = $1 ORDER BY attempt",
        )
        .bind(task_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| RunRecord::try_from(r).ok())
            .collect())
    }
}
