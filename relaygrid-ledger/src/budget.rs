//! Postgres-backed [`BudgetStore`], grounded on `shared/resilience.py`'s
//! `BudgetGuard.record_usage` (upsert the daily row, append a sample for the
//! sliding window) and `get_sliding_window_spend` (sum samples in window).

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use relaygrid_core::OrchestratorError;
use relaygrid_resilience::BudgetStore;
use sqlx::PgPool;

pub struct PgBudgetStore {
    pool: PgPool,
}

impl PgBudgetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensures a `(provider, today)` row exists with the given default
    /// budget, without clobbering `spent_usd` if the row is already there.
    pub async fn ensure_today_row(
        &self,
        provider: &str,
        default_budget_usd: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO relaygrid_budgets (provider, date, budget_usd)
             VALUES ($1, CURRENT_DATE, $2)
             ON CONFLICT (provider, date) DO NOTHING",
        )
        .bind(provider)
        .bind(default_budget_usd)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BudgetStore for PgBudgetStore {
    async fn spend_in_window(
        &self,
        provider: &str,
        window: Duration,
    ) -> Result<f64, OrchestratorError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        let row: (Option<f64>,) = sqlx::query_as(
            "SELECT sum(cost_usd) FROM relaygrid_budget_samples
             WHERE provider = $1 AND recorded_at >= $2",
        )
        .bind(provider)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        Ok(row.0.unwrap_or(0.0))
    }

    async fn record_spend(
        &self,
        provider: &str,
        amount: f64,
        tokens: i64,
    ) -> Result<(), OrchestratorError> {
        sqlx::query(
            "INSERT INTO relaygrid_budget_samples (provider, recorded_at, cost_usd)
             VALUES ($1, now(), $2)",
        )
        .bind(provider)
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;

        sqlx::query(
            "INSERT INTO relaygrid_budgets
                (provider, date, budget_usd, spent_usd, request_count, token_count, last_updated)
             VALUES ($1, CURRENT_DATE, 0, $2, 1, $3, now())
             ON CONFLICT (provider, date) DO UPDATE SET
                spent_usd = relaygrid_budgets.spent_usd + EXCLUDED.spent_usd,
                request_count = relaygrid_budgets.request_count + 1,
                token_count = relaygrid_budgets.token_count + EXCLUDED.token_count,
                last_updated = now()",
        )
        .bind(provider)
        .bind(amount)
        .bind(tokens)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        Ok(())
    }

    async fn daily_budget(&self, provider: &str) -> Result<f64, OrchestratorError> {
        let row: Option<(f64,)> = sqlx::query_as(
            "SELECT budget_usd FROM relaygrid_budgets WHERE provider = $1 AND date = CURRENT_DATE",
        )
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
        Ok(row.map(|r| r.0).unwrap_or(0.0))
    }
}
