//! Shared axum state, grounded on the teacher's `ExecutionApiState` in
//! `examples/execution_server.rs`.

use std::sync::Arc;

use relaygrid_core::OrchestratorConfig;
use relaygrid_ledger::{ApiKeyRepository, InboxRepository, RunRepository, TaskRepository};
use relaygrid_queue::QueueEngine;
use relaygrid_worker::HandlerRegistry;

#[derive(Clone)]
pub struct IngressConfig {
    pub api_key_salt: String,
    pub webhook_secrets: std::collections::HashMap<String, String>,
    pub webhook_timestamp_tolerance: std::time::Duration,
}

impl IngressConfig {
    pub fn from_orchestrator_config(
        cfg: &OrchestratorConfig,
        api_key_salt: String,
        webhook_secrets: std::collections::HashMap<String, String>,
    ) -> Self {
        Self {
            api_key_salt,
            webhook_secrets,
            webhook_timestamp_tolerance: cfg.webhook_timestamp_tolerance,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn QueueEngine>,
    pub registry: Arc<HandlerRegistry>,
    pub tasks: Arc<TaskRepository>,
    pub runs: Arc<RunRepository>,
    pub api_keys: Arc<ApiKeyRepository>,
    pub inbox: Arc<InboxRepository>,
    pub config: Arc<IngressConfig>,
}
