//! Periodic persistence of in-memory breaker state (spec §4.3/§4.4), mirroring
//! `shared/resilience.py`'s `_sync_to_db` (called on every failure, and
//! periodically on success so a crash loses at most a few seconds of state).

use std::str::FromStr;

use relaygrid_core::{CircuitBreakerRow, CircuitState};
use sqlx::{FromRow, PgPool};

#[derive(FromRow)]
struct Row {
    service: String,
    state: String,
    opened_at: Option<chrono::DateTime<chrono::Utc>>,
    next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    success_count: i64,
    failure_count: i64,
    last_success_at: Option<chrono::DateTime<chrono::Utc>>,
    last_failure_at: Option<chrono::DateTime<chrono::Utc>>,
    error_rate: f64,
    metadata: serde_json::Value,
}

pub struct CircuitBreakerRepository {
    pool: PgPool,
}

impl CircuitBreakerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, row: &CircuitBreakerRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO relaygrid_circuit_breakers
                (service, state, opened_at, next_retry_at, success_count, failure_count,
                 last_success_at, last_failure_at, error_rate, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (service) DO UPDATE SET
                state = EXCLUDED.state,
                opened_at = EXCLUDED.opened_at,
                next_retry_at = EXCLUDED.next_retry_at,
                success_count = EXCLUDED.success_count,
                failure_count = EXCLUDED.failure_count,
                last_success_at = EXCLUDED.last_success_at,
                last_failure_at = EXCLUDED.last_failure_at,
                error_rate = EXCLUDED.error_rate,
                metadata = EXCLUDED.metadata",
        )
        .bind(&row.service)
        .bind(row.state.as_str())
        .bind(row.opened_at)
        .bind(row.next_retry_at)
        .bind(row.success_count)
        .bind(row.failure_count)
        .bind(row.last_success_at)
        .bind(row.last_failure_at)
        .bind(row.error_rate)
        .bind(&row.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self, service: &str) -> Result<Option<CircuitBreakerRow>, sqlx::Error> {
        let row: Option<Row> =
            sqlx::query_as("SELECT * FROM relaygrid_circuit_breakers WHERE service = $1")
                .bind(service)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| CircuitBreakerRow {
            service: r.service,
            state: CircuitState::from_str(&r.state).unwrap_or(CircuitState::Closed),
            opened_at: r.opened_at,
            next_retry_at: r.next_retry_at,
            success_count: r.success_count,
            failure_count: r.failure_count,
            last_success_at: r.last_success_at,
            last_failure_at: r.last_failure_at,
            error_rate: r.error_rate,
            metadata: r.metadata,
        }))
    }
}
