//! # HTTP surface.
//!
//! | Method | Path             | Body / query          | Response                          |
//! |--------|------------------|-----------------------|-----------------------------------|
//! | POST   | `/task`          | `{"stepsTotal": 100}` | `200 {"taskId", "status":"queued"}` |
//! | GET    | `/task/{taskId}` | `?history=true`       | `200 {task}` or `404`             |
//!
//! Errors are rendered as `{"error": "<message>"}`:
//! - invalid step count → `400`
//! - queue full or shutting down → `503`
//! - unknown id → `404 {"error": "Task not found"}`

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::SubmitError;
use crate::events::{Failure, TaskId};
use crate::gateway::Gateway;
use crate::registry::{ProgressSnapshot, Task, TaskStatus};

const DEFAULT_STEPS: i64 = 100;

/// Builds the router over `gateway`.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/task", post(submit_task))
        .route("/task/{task_id}", get(task_status))
        .with_state(gateway)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Task not found")
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        let status = match err {
            SubmitError::InvalidSteps { .. } => StatusCode::BAD_REQUEST,
            SubmitError::Overloaded { .. } | SubmitError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    #[serde(default = "default_steps", alias = "steps")]
    steps_total: i64,
}

fn default_steps() -> i64 {
    DEFAULT_STEPS
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    task_id: TaskId,
    status: TaskStatus,
}

#[derive(Debug, Default, Deserialize)]
struct StatusQuery {
    #[serde(default)]
    history: bool,
}

/// Client view of a [`Task`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskView {
    task_id: TaskId,
    status: TaskStatus,
    progress: f64,
    steps_total: u64,
    created_at: DateTime<Utc>,
    last_update_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_result: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    partial_history: Option<Vec<ProgressSnapshot>>,
}

impl TaskView {
    fn new(task: Task, history: bool) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            progress: task.progress,
            steps_total: task.steps_total,
            created_at: task.created_at,
            last_update_at: task.last_update_at,
            completed_at: task.completed_at,
            final_result: task.final_result,
            error: task.error,
            partial_history: history.then_some(task.partial_history),
        }
    }
}

async fn submit_task(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let task_id = gateway.submit(req.steps_total).await?;
    Ok(Json(SubmitResponse {
        task_id,
        status: TaskStatus::Queued,
    }))
}

async fn task_status(
    State(gateway): State<Arc<Gateway>>,
    Path(task_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<TaskView>, ApiError> {
    let task = gateway
        .status(&TaskId::from(task_id))
        .await
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(TaskView::new(task, query.history)))
}
