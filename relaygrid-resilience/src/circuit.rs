//! Circuit breaker (spec §4.3, grounded on `shared/resilience.py`'s
//! `CircuitBreaker`).
//!
//! State lives in memory for fast, lock-free-ish decisions on the hot path;
//! callers that want it durable (e.g. across worker restarts) periodically
//! persist [`CircuitBreaker::snapshot`] through `relaygrid-ledger` the same
//! way the teacher's Python sweeps its in-memory deque to Postgres every few
//! seconds rather than on every call.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relaygrid_core::{CircuitBreakerRow, CircuitState, OrchestratorError};

/// Builder-configured breaker tunables (spec §6 config table).
#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerConfig {
    pub failure_rate_threshold: f64,
    pub sliding_window_size: usize,
    pub minimum_number_of_calls: usize,
    pub wait_duration_in_open: Duration,
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.10,
            sliding_window_size: 100,
            minimum_number_of_calls: 10,
            wait_duration_in_open: Duration::from_secs(600),
        }
    }
}

#[derive(Default)]
pub struct CircuitBreakerConfigBuilder {
    inner: Option<CircuitBreakerConfig>,
}

impl CircuitBreakerConfigBuilder {
    fn inner(&mut self) -> &mut CircuitBreakerConfig {
        self.inner.get_or_insert_with(CircuitBreakerConfig::default)
    }

    pub fn failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.inner().failure_rate_threshold = threshold;
        self
    }

    pub fn sliding_window_size(mut self, size: usize) -> Self {
        self.inner().sliding_window_size = size;
        self
    }

    pub fn minimum_number_of_calls(mut self, count: usize) -> Self {
        self.inner().minimum_number_of_calls = count;
        self
    }

    pub fn wait_duration_in_open(mut self, duration: Duration) -> Self {
        self.inner().wait_duration_in_open = duration;
        self
    }

    pub fn build(self) -> CircuitBreakerConfig {
        self.inner.unwrap_or_default()
    }
}

struct Inner {
    state: CircuitState,
    window: VecDeque<bool>,
    opened_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    success_count: i64,
    failure_count: i64,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    half_open_probe_in_flight: bool,
}

pub struct CircuitBreaker {
    pub service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(config.sliding_window_size),
                opened_at: None,
                next_retry_at: None,
                success_count: 0,
                failure_count: 0,
                last_success_at: None,
                last_failure_at: None,
                half_open_probe_in_flight: false,
            }),
        }
    }

    /// Checks whether a call may proceed, transitioning OPEN -> HALF_OPEN
    /// once `wait_duration_in_open` has elapsed (spec §4.3 `call`).
    pub fn guard(&self) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    Err(OrchestratorError::CircuitOpen {
                        service: self.service.clone(),
                    })
                } else {
                    inner.half_open_probe_in_flight = true;
                    Ok(())
                }
            }
            CircuitState::Open => {
                let now = Utc::now();
                if inner.next_retry_at.map(|t| now >= t).unwrap_or(false) {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probe_in_flight = true;
                    Ok(())
                } else {
                    Err(OrchestratorError::CircuitOpen {
                        service: self.service.clone(),
                    })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.success_count += 1;
        inner.last_success_at = Some(Utc::now());
        push_window(&mut inner.window, self.config.sliding_window_size, true);
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            inner.next_retry_at = None;
            inner.window.clear();
        }
        inner.half_open_probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Utc::now());
        push_window(&mut inner.window, self.config.sliding_window_size, false);
        inner.half_open_probe_in_flight = false;

        if inner.state == CircuitState::HalfOpen {
            self.open(&mut inner);
            return;
        }

        if inner.window.len() >= self.config.minimum_number_of_calls {
            let failures = inner.window.iter().filter(|ok| !**ok).count();
            let error_rate = failures as f64 / inner.window.len() as f64;
            if error_rate > self.config.failure_rate_threshold {
                self.open(&mut inner);
            }
        }
    }

    fn open(&self, inner: &mut Inner) {
        let now = Utc::now();
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.next_retry_at = Some(now + self.config.wait_duration_in_open);
    }

    pub fn snapshot(&self) -> CircuitBreakerRow {
        let inner = self.inner.lock().unwrap();
        let error_rate = if inner.window.is_empty() {
            0.0
        } else {
            inner.window.iter().filter(|ok| !**ok).count() as f64 / inner.window.len() as f64
        };
        CircuitBreakerRow {
            service: self.service.clone(),
            state: inner.state,
            opened_at: inner.opened_at,
            next_retry_at: inner.next_retry_at,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            last_success_at: inner.last_success_at,
            last_failure_at: inner.last_failure_at,
            error_rate,
            metadata: serde_json::json!({}),
        }
    }
}

fn push_window(window: &mut VecDeque<bool>, capacity: usize, ok: bool) {
    if window.len() >= capacity {
        window.pop_front();
    }
    window.push_back(ok);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "anthropic",
            CircuitBreakerConfig::builder()
                .failure_rate_threshold(0.5)
                .sliding_window_size(10)
                .minimum_number_of_calls(4)
                .wait_duration_in_open(Duration::from_millis(0))
                .build(),
        )
    }

    #[test]
    fn opens_after_threshold_breached() {
        let cb = breaker();
        for _ in 0..4 {
            cb.guard().unwrap();
            cb.record_failure();
        }
        assert!(cb.guard().is_ok(), "should transition to half-open immediately since wait is 0");
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
    }

    #[test]
    fn stays_closed_below_minimum_calls() {
        let cb = breaker();
        cb.guard().unwrap();
        cb.record_failure();
        cb.guard().unwrap();
        cb.record_failure();
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
    }

    #[test]
    fn half_open_success_closes_circuit() {
        let cb = breaker();
        for _ in 0..4 {
            cb.guard().unwrap();
            cb.record_failure();
        }
        cb.guard().unwrap();
        cb.record_success();
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = breaker();
        for _ in 0..4 {
            cb.guard().unwrap();
            cb.record_failure();
        }
        cb.guard().unwrap();
        cb.record_failure();
        assert_eq!(cb.snapshot().state, CircuitState::Open);
    }
}
