//! Illustrative handler implementations. The spec's own handler catalog
//! (code review, deploys, content generation, ...) is out of scope for the
//! core; these two exist to give the registry something real to dispatch
//! to and to ground the maintenance-cron path left as an open question.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use relaygrid_core::{OrchestratorError, Task};
use relaygrid_ledger::PgBudgetStore;
use relaygrid_resilience::ModelFailover;
use relaygrid_worker::TaskHandler;
use serde_json::Value;

/// Round-trips its payload. Used by integration tests and as a smoke-test
/// handler for a freshly deployed worker.
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    fn task_type(&self) -> &str {
        "echo"
    }

    fn payload_schema(&self) -> Option<Value> {
        Some(serde_json::json!({
            "type": "object",
            "required": ["message"],
            "properties": { "message": { "type": "string" } }
        }))
    }

    async fn handle(&self, task: &Task) -> Result<Value, OrchestratorError> {
        Ok(task.payload.clone())
    }
}

/// Periodic housekeeping hook (grounded on `orchestrator/handlers/
/// maintenance.py`). Retention/compaction policy is deliberately left
/// unimplemented beyond the success acknowledgment — see DESIGN.md's open
/// question on maintenance scope.
pub struct MaintenanceHandler;

#[async_trait]
impl TaskHandler for MaintenanceHandler {
    fn task_type(&self) -> &str {
        "maintenance"
    }

    async fn handle(&self, _task: &Task) -> Result<Value, OrchestratorError> {
        Ok(serde_json::json!({ "status": "success" }))
    }
}

/// Sleeps for `payload.duration_ms` before succeeding. Used by worker tests
/// to exercise lease heartbeats and graceful shutdown against a task that
/// takes a controllable amount of wall-clock time.
pub struct SleepMsHandler;

#[async_trait]
impl TaskHandler for SleepMsHandler {
    fn task_type(&self) -> &str {
        "sleep_ms"
    }

    fn payload_schema(&self) -> Option<Value> {
        Some(serde_json::json!({
            "type": "object",
            "required": ["duration_ms"],
            "properties": { "duration_ms": { "type": "integer", "minimum": 0 } }
        }))
    }

    async fn handle(&self, task: &Task) -> Result<Value, OrchestratorError> {
        let duration_ms = task
            .payload
            .get("duration_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        tokio::time::sleep(std::time::Duration::from_millis(duration_ms)).await;
        Ok(serde_json::json!({ "slept_ms": duration_ms }))
    }
}

/// Always reports a handler-business failure. Used by worker/queue tests to
/// exercise the nack/backoff/DLQ path without needing a real downstream
/// dependency to break.
pub struct AlwaysFailHandler;

#[async_trait]
impl TaskHandler for AlwaysFailHandler {
    fn task_type(&self) -> &str {
        "always_fail"
    }

    async fn handle(&self, _task: &Task) -> Result<Value, OrchestratorError> {
        Err(OrchestratorError::HandlerBusiness(
            "always_fail handler invoked".to_string(),
        ))
    }
}

/// Forwards `payload.body` to an upstream AI provider over HTTP, routed
/// through [`ModelFailover`] so a provider that is over budget or
/// breaker-open is skipped in favor of the next one (spec §4.3, grounded on
/// `shared/resilience.py`'s `ModelFailover.call_with_failover`). This is the
/// one reachable call site for the circuit breaker and budget guard: every
/// other resilience type in this workspace exists to be driven through here.
pub struct ModelCallHandler {
    failover: Arc<ModelFailover<PgBudgetStore>>,
    endpoints: HashMap<String, String>,
    http: reqwest::Client,
}

impl ModelCallHandler {
    pub fn new(
        failover: Arc<ModelFailover<PgBudgetStore>>,
        endpoints: HashMap<String, String>,
    ) -> Self {
        Self {
            failover,
            endpoints,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TaskHandler for ModelCallHandler {
    fn task_type(&self) -> &str {
        "model_call"
    }

    fn payload_schema(&self) -> Option<Value> {
        Some(serde_json::json!({
            "type": "object",
            "required": ["body"],
            "properties": {
                "body": { "type": "object" },
                "estimated_cost_usd": { "type": "number" },
                "estimated_tokens": { "type": "integer" }
            }
        }))
    }

    async fn handle(&self, task: &Task) -> Result<Value, OrchestratorError> {
        let body = task.payload.get("body").cloned().unwrap_or(Value::Null);
        let estimated_cost = task
            .payload
            .get("estimated_cost_usd")
            .and_then(Value::as_f64)
            .unwrap_or(0.01);
        let estimated_tokens = task
            .payload
            .get("estimated_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let endpoints = &self.endpoints;
        let http = &self.http;
        self.failover
            .call_with_failover(estimated_cost, estimated_tokens, |provider| {
                let body = body.clone();
                async move {
                    let url = endpoints.get(provider).ok_or_else(|| {
                        OrchestratorError::Transport(format!("no endpoint configured for {provider}"))
                    })?;
                    let response = http
                        .post(url)
                        .json(&body)
                        .send()
                        .await
                        .map_err(|e| OrchestratorError::Transport(e.to_string()))?;
                    if !response.status().is_success() {
                        return Err(OrchestratorError::Transport(format!(
                            "{provider} returned {}",
                            response.status()
                        )));
                    }
                    response
                        .json::<Value>()
                        .await
                        .map_err(|e| OrchestratorError::Transport(e.to_string()))
                }
            })
            .await
    }
}
