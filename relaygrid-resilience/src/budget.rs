//! Sliding-window budget guard (spec §4.3, grounded on `shared/resilience.py`'s
//! `BudgetGuard`).
//!
//! Spend is tracked as a list of `(timestamp, cost)` samples per provider,
//! summed over a trailing window (24h in the teacher) to decide whether a
//! new call would exceed the daily ceiling. `check_budget` and
//! `record_usage` are two separate calls, not one atomic operation: a
//! caller can check, get interrupted, and overspend slightly before
//! recording. The teacher accepts this race rather than serializing every
//! call through a lock, and so do we — the ceiling is a soft guardrail, not
//! a hard financial control.

use std::time::Duration;

use async_trait::async_trait;
use relaygrid_core::OrchestratorError;

#[async_trait]
pub trait BudgetStore: Send + Sync {
    async fn spend_in_window(
        &self,
        provider: &str,
        window: Duration,
    ) -> Result<f64, OrchestratorError>;

    async fn record_spend(
        &self,
        provider: &str,
        amount: f64,
        tokens: i64,
    ) -> Result<(), OrchestratorError>;

    async fn daily_budget(&self, provider: &str) -> Result<f64, OrchestratorError>;
}

pub struct BudgetGuard<S: BudgetStore> {
    store: S,
    window: Duration,
}

impl<S: BudgetStore> BudgetGuard<S> {
    pub fn new(store: S, window: Duration) -> Self {
        Self { store, window }
    }

    /// Raises [`OrchestratorError::BudgetExceeded`] if `estimated_cost`
    /// would push the provider's trailing-window spend over its daily
    /// budget (spec §4.3 `check_budget`).
    pub async fn check_budget(
        &self,
        provider: &str,
        estimated_cost: f64,
    ) -> Result<(), OrchestratorError> {
        let spent = self.store.spend_in_window(provider, self.window).await?;
        let budget = self.store.daily_budget(provider).await?;
        if spent + estimated_cost > budget {
            return Err(OrchestratorError::BudgetExceeded {
                provider: provider.to_string(),
                spent,
                budget,
                requested: estimated_cost,
            });
        }
        Ok(())
    }

    pub async fn record_usage(
        &self,
        provider: &str,
        actual_cost: f64,
        tokens: i64,
    ) -> Result<(), OrchestratorError> {
        self.store.record_spend(provider, actual_cost, tokens).await
    }

    pub async fn remaining_budget(&self, provider: &str) -> Result<f64, OrchestratorError> {
        let spent = self.store.spend_in_window(provider, self.window).await?;
        let budget = self.store.daily_budget(provider).await?;
        Ok((budget - spent).max(0.0))
    }
}

/// Single-process [`BudgetStore`] for tests: a fixed daily budget per
/// provider and an in-memory sample list, evicted on read the way the
/// teacher's `zremrangebyscore` call evicts stale Redis entries.
pub struct InMemoryBudgetStore {
    daily_budgets: std::collections::HashMap<String, f64>,
    samples: std::sync::Mutex<std::collections::HashMap<String, Vec<(chrono::DateTime<chrono::Utc>, f64)>>>,
}

impl InMemoryBudgetStore {
    pub fn new(daily_budgets: std::collections::HashMap<String, f64>) -> Self {
        Self {
            daily_budgets,
            samples: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait]
impl BudgetStore for InMemoryBudgetStore {
    async fn spend_in_window(
        &self,
        provider: &str,
        window: Duration,
    ) -> Result<f64, OrchestratorError> {
        let mut samples = self.samples.lock().unwrap();
        let entries = samples.entry(provider.to_string()).or_default();
        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        entries.retain(|(ts, _)| *ts >= cutoff);
        Ok(entries.iter().map(|(_, cost)| cost).sum())
    }

    async fn record_spend(
        &self,
        provider: &str,
        amount: f64,
        _tokens: i64,
    ) -> Result<(), OrchestratorError> {
        let mut samples = self.samples.lock().unwrap();
        samples
            .entry(provider.to_string())
            .or_default()
            .push((chrono::Utc::now(), amount));
        Ok(())
    }

    async fn daily_budget(&self, provider: &str) -> Result<f64, OrchestratorError> {
        Ok(*self.daily_budgets.get(provider).unwrap_or(&0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(daily: f64) -> BudgetGuard<InMemoryBudgetStore> {
        let mut budgets = std::collections::HashMap::new();
        budgets.insert("anthropic".to_string(), daily);
        BudgetGuard::new(InMemoryBudgetStore::new(budgets), Duration::from_secs(86_400))
    }

    #[tokio::test]
    async fn allows_spend_within_budget() {
        let g = guard(10.0);
        assert!(g.check_budget("anthropic", 5.0).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_spend_over_budget() {
        let g = guard(10.0);
        g.record_usage("anthropic", 9.0, 0).await.unwrap();
        let result = g.check_budget("anthropic", 5.0).await;
        assert!(matches!(result, Err(OrchestratorError::BudgetExceeded { .. })));
    }

    #[tokio::test]
    async fn remaining_budget_reflects_recorded_spend() {
        let g = guard(10.0);
        g.record_usage("anthropic", 4.0, 0).await.unwrap();
        let remaining = g.remaining_budget("anthropic").await.unwrap();
        assert!((remaining - 6.0).abs() < 1e-9);
    }

    /// Exercises the guard from a synchronous call site via `block_on`,
    /// matching how a CLI command without its own tokio runtime would call
    /// into this crate.
    #[test]
    fn check_budget_blocks_on_sync_call_site() {
        let g = guard(10.0);
        let result = tokio_test::block_on(g.check_budget("anthropic", 5.0));
        assert!(result.is_ok());
    }
}
