//! Environment-driven configuration (spec §6 configuration table).
//!
//! Every field has a documented default mirroring the original
//! `orchestrator/config.py` environment variables, loaded the way the
//! teacher's CLI examples load their sqlite/database URLs: read once at
//! startup, passed down by value/reference from there on.

use std::env;
use std::time::Duration;

/// Tunables shared by the worker runtime, queue engine, and resilience
/// layer. Constructed once at process startup via [`OrchestratorConfig::from_env`].
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Max tasks a single worker process executes concurrently.
    pub max_concurrency: usize,
    /// How long a claimed message stays invisible before `reclaim_expired`
    /// treats it as abandoned.
    pub visibility_timeout: Duration,
    /// Attempts allowed before a task is moved to the dead-letter queue.
    pub max_retries: u32,
    /// Base of the exponential backoff applied between retries.
    pub backoff_base: Duration,
    /// Ceiling on the backoff delay, regardless of attempt count.
    pub backoff_max: Duration,
    /// Default per-provider daily spend ceiling in USD, used when no
    /// provider-specific override exists in the ledger.
    pub daily_budget_usd: f64,
    /// Error-rate threshold (0.0-1.0) that opens a circuit breaker.
    pub breaker_failure_threshold: f64,
    /// How long a breaker stays OPEN before probing HALF_OPEN.
    pub breaker_timeout: Duration,
    /// Sliding window size (sample count) used for breaker error-rate and
    /// budget spend calculations.
    pub breaker_window_size: usize,
    /// Allowed clock skew when verifying webhook timestamps.
    pub webhook_timestamp_tolerance: Duration,
    /// TTL on the idempotency lock held during `enqueue`.
    pub idempotency_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            visibility_timeout: Duration::from_secs(900),
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(60),
            daily_budget_usd: 50.0,
            breaker_failure_threshold: 0.10,
            breaker_timeout: Duration::from_secs(600),
            breaker_window_size: 100,
            webhook_timestamp_tolerance: Duration::from_secs(300),
            idempotency_ttl: Duration::from_secs(86_400),
        }
    }
}

impl OrchestratorConfig {
    /// Builds a config from the process environment, falling back to
    /// [`Default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrency: env_usize("RELAYGRID_MAX_CONCURRENCY", defaults.max_concurrency),
            visibility_timeout: env_secs(
                "RELAYGRID_VISIBILITY_TIMEOUT_SECONDS",
                defaults.visibility_timeout,
            ),
            max_retries: env_u32("RELAYGRID_MAX_RETRIES", defaults.max_retries),
            backoff_base: env_secs("RELAYGRID_BACKOFF_BASE_SECONDS", defaults.backoff_base),
            backoff_max: env_secs("RELAYGRID_BACKOFF_MAX_SECONDS", defaults.backoff_max),
            daily_budget_usd: env_f64("RELAYGRID_DAILY_BUDGET_USD", defaults.daily_budget_usd),
            breaker_failure_threshold: env_f64(
                "RELAYGRID_BREAKER_FAILURE_THRESHOLD",
                defaults.breaker_failure_threshold,
            ),
            breaker_timeout: env_secs(
                "RELAYGRID_BREAKER_TIMEOUT_SECONDS",
                defaults.breaker_timeout,
            ),
            breaker_window_size: env_usize(
                "RELAYGRID_BREAKER_WINDOW_SIZE",
                defaults.breaker_window_size,
            ),
            webhook_timestamp_tolerance: env_secs(
                "RELAYGRID_WEBHOOK_TIMESTAMP_TOLERANCE_SECONDS",
                defaults.webhook_timestamp_tolerance,
            ),
            idempotency_ttl: env_secs(
                "RELAYGRID_IDEMPOTENCY_TTL_SECONDS",
                defaults.idempotency_ttl,
            ),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert!(cfg.breaker_failure_threshold > 0.0 && cfg.breaker_failure_threshold < 1.0);
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        env::remove_var("RELAYGRID_MAX_CONCURRENCY_TEST_UNSET_PROBE");
        let cfg = OrchestratorConfig::from_env();
        assert!(cfg.max_concurrency > 0);
    }
}
