//! Inner per-attempt retry for transient infrastructure errors, grounded on
//! `orchestrator/worker.py`'s `execute_with_retries`
//! (`tenacity.retry(retry_if_exception_type((ConnectionError, TimeoutError)),
//! stop_after_attempt(6), wait_exponential(multiplier=2, max=60))`).
//!
//! This is a *second*, narrower retry layer than the queue engine's
//! nack/backoff/DLQ path: it exists to absorb a single flaky connection
//! within one delivery, not to implement the task's overall retry budget.

use std::time::Duration;

use relaygrid_core::OrchestratorError;

#[derive(Clone, Copy, Debug)]
pub struct InnerRetryConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for InnerRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(60),
        }
    }
}

pub async fn run_with_retry<F, Fut, T>(
    config: InnerRetryConfig,
    mut f: F,
) -> Result<T, OrchestratorError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, OrchestratorError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let transient = matches!(
                    err.class(),
                    relaygrid_core::ErrorClass::InfrastructureTransient
                );
                if !transient || attempt >= config.max_attempts {
                    return Err(err);
                }
                let delay = config
                    .backoff_base
                    .saturating_mul(2u32.saturating_pow(attempt - 1))
                    .min(config.backoff_max);
                tracing::debug!(attempt, ?delay, "retrying transient failure");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_after_transient_failures_within_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let config = InnerRetryConfig {
            max_attempts: 5,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
        };
        let result = run_with_retry(config, move || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(OrchestratorError::InfrastructureTransient("blip".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<i32, _> = run_with_retry(InnerRetryConfig::default(), move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OrchestratorError::InfrastructurePermanent("bad request".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
