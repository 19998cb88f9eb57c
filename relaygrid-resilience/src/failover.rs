//! Ordered provider failover (spec §4.3, grounded on `shared/resilience.py`'s
//! `ModelFailover`).
//!
//! Providers are tried strictly in the order they were registered, never
//! round-robin: the first one whose budget and breaker both allow a call
//! wins. A provider that is over budget or breaker-open is skipped, not
//! retried later in the same call.

use std::future::Future;
use std::sync::Arc;

use relaygrid_core::OrchestratorError;
use tracing::warn;

use crate::budget::{BudgetGuard, BudgetStore};
use crate::circuit::CircuitBreaker;

struct ProviderSlot {
    name: String,
    breaker: Arc<CircuitBreaker>,
}

pub struct ModelFailover<S: BudgetStore> {
    providers: Vec<ProviderSlot>,
    budget: Arc<BudgetGuard<S>>,
}

impl<S: BudgetStore> ModelFailover<S> {
    pub fn new(budget: Arc<BudgetGuard<S>>) -> Self {
        Self {
            providers: Vec::new(),
            budget,
        }
    }

    pub fn register(mut self, name: impl Into<String>, breaker: Arc<CircuitBreaker>) -> Self {
        self.providers.push(ProviderSlot {
            name: name.into(),
            breaker,
        });
        self
    }

    /// Calls `f(provider_name)` for the first provider whose budget and
    /// breaker both allow it, in registration order. Returns
    /// [`OrchestratorError::AllProvidersFailed`] aggregating every skip/error
    /// reason if none succeed (spec §4.3 `call_with_failover`).
    pub async fn call_with_failover<F, Fut, T>(
        &self,
        estimated_cost: f64,
        tokens: i64,
        mut f: F,
    ) -> Result<T, OrchestratorError>
    where
        F: FnMut(&str) -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        let mut reasons = Vec::new();

        for slot in &self.providers {
            if let Err(err) = self.budget.check_budget(&slot.name, estimated_cost).await {
                warn!(provider = %slot.name, %err, "provider skipped: budget");
                reasons.push(format!("{}: {err}", slot.name));
                continue;
            }
            if let Err(err) = slot.breaker.guard() {
                warn!(provider = %slot.name, %err, "provider skipped: circuit open");
                reasons.push(format!("{}: {err}", slot.name));
                continue;
            }

            match f(&slot.name).await {
                Ok(value) => {
                    slot.breaker.record_success();
                    if let Err(err) = self
                        .budget
                        .record_usage(&slot.name, estimated_cost, tokens)
                        .await
                    {
                        warn!(provider = %slot.name, %err, "failed to record provider spend");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    slot.breaker.record_failure();
                    reasons.push(format!("{}: {err}", slot.name));
                }
            }
        }

        Err(OrchestratorError::AllProvidersFailed(reasons.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::InMemoryBudgetStore;
    use crate::circuit::{CircuitBreakerConfig, CircuitBreaker};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn failover() -> ModelFailover<InMemoryBudgetStore> {
        let mut budgets = HashMap::new();
        budgets.insert("anthropic".to_string(), 100.0);
        budgets.insert("openai".to_string(), 100.0);
        let guard = Arc::new(BudgetGuard::new(
            InMemoryBudgetStore::new(budgets),
            Duration::from_secs(86_400),
        ));
        ModelFailover::new(guard)
            .register(
                "anthropic",
                Arc::new(CircuitBreaker::new("anthropic", CircuitBreakerConfig::default())),
            )
            .register(
                "openai",
                Arc::new(CircuitBreaker::new("openai", CircuitBreakerConfig::default())),
            )
    }

    #[tokio::test]
    async fn first_provider_success_short_circuits() {
        let fo = failover();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result = fo
            .call_with_failover(1.0, 100, move |_provider| {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, OrchestratorError>(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn falls_back_to_next_provider_on_failure() {
        let fo = failover();
        let result = fo
            .call_with_failover(1.0, 100, |provider| {
                let provider = provider.to_string();
                async move {
                    if provider == "anthropic" {
                        Err(OrchestratorError::Transport("down".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test]
    async fn all_providers_failing_returns_aggregate_error() {
        let fo = failover();
        let result = fo
            .call_with_failover(1.0, 100, |_provider| async {
                Err::<i32, _>(OrchestratorError::Transport("down".into()))
            })
            .await;
        assert!(matches!(result, Err(OrchestratorError::AllProvidersFailed(_))));
    }
}
