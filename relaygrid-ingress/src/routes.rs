//! HTTP surface (spec §4.6), grounded on `app/api/main.py`'s submit/status/
//! webhook endpoints and the teacher's `build_router` in
//! `examples/execution_server.rs`.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use relaygrid_core::{ApiKeyRole, OrchestratorError, QueueMessage, Task, TaskId, TaskPriority, TaskStatus};
use relaygrid_queue::EnqueueOutcome;
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedKey;
use crate::state::AppState;
use crate::webhook::{verify_webhook, SignatureScheme};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/tasks", post(submit_task))
        .route("/v1/tasks/:id", get(get_task))
        .route("/v1/tasks/:id/stream", get(stream_task))
        .route("/v1/webhooks/:source", post(handle_webhook))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
pub struct SubmitTaskRequest {
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    pub idempotency_key: Option<String>,
    pub trace_id: Option<String>,
}

#[derive(Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub deduplicated: bool,
}

async fn submit_task(
    auth: AuthenticatedKey,
    State(state): State<AppState>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<Json<SubmitTaskResponse>, ApiError> {
    auth.require_role(ApiKeyRole::Service)?;

    state
        .registry
        .validate_payload(&req.task_type, &req.payload)?;

    let mut task = Task::new(req.task_type, req.payload);
    task.priority = req.priority.unwrap_or_default();
    task.idempotency_key = req.idempotency_key.clone();
    task.trace_id = req.trace_id;

    let message = QueueMessage::from_task(&task);
    let outcome = state
        .queue
        .enqueue(message, req.idempotency_key.as_deref())
        .await?;

    match outcome {
        EnqueueOutcome::Enqueued(_) => {
            state.tasks.insert(&task).await.map_err(|e| {
                OrchestratorError::InfrastructureTransient(e.to_string())
            })?;
            Ok(Json(SubmitTaskResponse {
                task_id: task.id,
                status: task.status,
                deduplicated: false,
            }))
        }
        EnqueueOutcome::Duplicate(_) => {
            let key = req.idempotency_key.as_deref().unwrap_or_default();
            let original = state
                .tasks
                .find_by_idempotency_key(key)
                .await
                .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?
                .ok_or(ApiError::NotFound)?;
            Ok(Json(SubmitTaskResponse {
                task_id: original.id,
                status: original.status,
                deduplicated: true,
            }))
        }
    }
}

#[derive(Serialize)]
pub struct TaskStatusResponse {
    pub id: TaskId,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
}

impl TaskStatusResponse {
    fn new(task: Task, latest_run: Option<relaygrid_core::RunRecord>) -> Self {
        let (result, error) = match latest_run {
            Some(run) => (run.metrics.get("result").cloned(), run.error_details),
            None => (None, None),
        };
        Self {
            id: task.id,
            status: task.status,
            retry_count: task.retry_count,
            last_error: task.last_error,
            result,
            error,
        }
    }
}

async fn get_task(
    auth: AuthenticatedKey,
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    auth.require_role(ApiKeyRole::Readonly)?;
    let task = state
        .tasks
        .get(id)
        .await
        .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?
        .ok_or(ApiError::NotFound)?;
    let latest_run = state
        .runs
        .list_for_task(id)
        .await
        .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?
        .into_iter()
        .last();
    Ok(Json(TaskStatusResponse::new(task, latest_run)))
}

/// Server-sent events of a task's status until it reaches a terminal state
/// (spec §4.6 streaming surface). Polls the ledger rather than subscribing
/// to a pub/sub channel, matching the teacher's simplicity bias for status
/// surfaces over adding a second transport.
async fn stream_task(
    auth: AuthenticatedKey,
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    auth.require_role(ApiKeyRole::Readonly)?;

    let stream = async_stream::stream! {
        loop {
            match state.tasks.get(id).await {
                Ok(Some(task)) => {
                    let terminal = task.status.is_terminal();
                    let latest_run = state.runs.list_for_task(id).await.ok().and_then(|runs| runs.into_iter().last());
                    let payload = TaskStatusResponse::new(task, latest_run);
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().data(json));
                    }
                    if terminal {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    };

    Ok(Sse::new(stream))
}

#[derive(Deserialize)]
pub struct WebhookQuery {
    pub external_id: String,
    pub signature: String,
    pub timestamp: Option<i64>,
}

async fn handle_webhook(
    Path(source): Path<String>,
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<WebhookQuery>,
    body: axum::body::Bytes,
) -> Result<Json<SubmitTaskResponse>, ApiError> {
    let secret = state
        .config
        .webhook_secrets
        .get(&source)
        .ok_or(ApiError::NotFound)?;

    let scheme = if query.timestamp.is_some() {
        SignatureScheme::Generic
    } else {
        SignatureScheme::PlainHmac
    };

    verify_webhook(
        scheme,
        secret,
        &body,
        &query.signature,
        query.timestamp,
        state.config.webhook_timestamp_tolerance,
    )?;

    let accepted = state
        .inbox
        .try_accept(&source, &query.external_id, &query.signature)
        .await
        .map_err(|e| OrchestratorError::InfrastructureTransient(e.to_string()))?;
    if !accepted {
        return Err(ApiError::from(OrchestratorError::Replay {
            source,
            external_id: query.external_id,
        }));
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            let _ = state
                .inbox
                .mark_rejected(&source, &query.external_id, "malformed payload")
                .await;
            return Err(ApiError::from(OrchestratorError::from(err)));
        }
    };
    let mut task = Task::new("webhook_process", serde_json::json!({
        "source": source,
        "body": payload,
    }));
    task.priority = TaskPriority::High;

    let message = QueueMessage::from_task(&task);
    if let Err(err) = state.queue.enqueue(message, None).await {
        let _ = state
            .inbox
            .mark_rejected(&source, &query.external_id, "enqueue failed")
            .await;
        return Err(ApiError::from(err));
    }
    state.tasks.insert(&task).await.map_err(|e| {
        OrchestratorError::InfrastructureTransient(e.to_string())
    })?;

    Ok(Json(SubmitTaskResponse {
        task_id: task.id,
        status: task.status,
        deduplicated: false,
    }))
}

pub enum ApiError {
    Orchestrator(OrchestratorError),
    Forbidden,
    NotFound,
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}

impl From<axum::http::StatusCode> for ApiError {
    fn from(_code: axum::http::StatusCode) -> Self {
        ApiError::Forbidden
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Orchestrator(err) => {
                let status = match err.class() {
                    relaygrid_core::ErrorClass::Replay => axum::http::StatusCode::CONFLICT,
                    relaygrid_core::ErrorClass::InfrastructurePermanent => {
                        axum::http::StatusCode::BAD_REQUEST
                    }
                    relaygrid_core::ErrorClass::CircuitOpen
                    | relaygrid_core::ErrorClass::Budget => axum::http::StatusCode::SERVICE_UNAVAILABLE,
                    _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
            ApiError::Forbidden => (axum::http::StatusCode::FORBIDDEN, "forbidden".to_string()),
            ApiError::NotFound => (axum::http::StatusCode::NOT_FOUND, "not found".to_string()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
