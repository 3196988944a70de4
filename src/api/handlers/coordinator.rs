//! Task Coordinator endpoints

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use tracing::error;

use super::AppContext;
use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::coordinator::{CoordinatorError, SubmitRequest};
use crate::types::{AgentRole, AgentStatus};

/// Map a coordinator error to the envelope, hiding internal detail
fn error_response(e: CoordinatorError) -> Response {
    match e {
        CoordinatorError::AgentNotFound(_) | CoordinatorError::TaskNotFound(_) => {
            ApiErrorResponse::not_found(e.to_string())
        }
        CoordinatorError::Unavailable(_) => {
            error!(error = %e, "Coordinator unavailable");
            ApiErrorResponse::service_unavailable("coordinator unavailable")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub role: AgentRole,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// POST /api/v1/coordinator/register
pub async fn register(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    match ctx
        .coordinator
        .register_agent(req.name, req.role, req.capabilities)
        .await
    {
        Ok(agent) => ApiResponse::ok(agent),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    pub status: Option<AgentStatus>,
}

/// POST /api/v1/coordinator/heartbeat
pub async fn heartbeat(
    State(ctx): State<AppContext>,
    Json(req): Json<HeartbeatRequest>,
) -> Response {
    match ctx.coordinator.heartbeat(&req.agent_id, req.status).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({"acknowledged": true})),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/coordinator/task/submit
pub async fn submit_task(
    State(ctx): State<AppContext>,
    Json(req): Json<SubmitRequest>,
) -> Response {
    match ctx.coordinator.submit_task(req).await {
        Ok(task) => ApiResponse::ok(task),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct NextTaskRequest {
    pub agent_id: String,
}

/// POST /api/v1/coordinator/task/next
pub async fn next_task(
    State(ctx): State<AppContext>,
    Json(req): Json<NextTaskRequest>,
) -> Response {
    match ctx.coordinator.request_next_task(&req.agent_id).await {
        Ok(offer) => ApiResponse::ok(offer),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteTaskRequest {
    pub task_id: String,
    pub agent_id: String,
    pub output: Option<serde_json::Value>,
}

/// POST /api/v1/coordinator/task/complete
pub async fn complete_task(
    State(ctx): State<AppContext>,
    Json(req): Json<CompleteTaskRequest>,
) -> Response {
    match ctx
        .coordinator
        .complete_task(&req.task_id, &req.agent_id, req.output)
        .await
    {
        Ok(task) => ApiResponse::ok(task),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct FailTaskRequest {
    pub task_id: String,
    pub agent_id: String,
    pub error: String,
    #[serde(default)]
    pub should_retry: bool,
}

/// POST /api/v1/coordinator/task/fail
pub async fn fail_task(
    State(ctx): State<AppContext>,
    Json(req): Json<FailTaskRequest>,
) -> Response {
    match ctx
        .coordinator
        .fail_task(&req.task_id, &req.agent_id, req.error, req.should_retry)
        .await
    {
        Ok(task) => ApiResponse::ok(task),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/coordinator/status
pub async fn status(State(ctx): State<AppContext>) -> Response {
    match ctx.coordinator.status().await {
        Ok(status) => ApiResponse::ok(status),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/coordinator/agents
pub async fn agents(State(ctx): State<AppContext>) -> Response {
    match ctx.coordinator.agents().await {
        Ok(agents) => ApiResponse::ok(agents),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/coordinator/task/:id
pub async fn get_task(State(ctx): State<AppContext>, Path(id): Path<String>) -> Response {
    match ctx.coordinator.get_task(&id).await {
        Ok(task) => ApiResponse::ok(task),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/coordinator/analyze-cohesion
pub async fn analyze_cohesion(State(ctx): State<AppContext>) -> Response {
    match ctx.coordinator.analyze_cohesion().await {
        Ok(task) => ApiResponse::ok(task),
        Err(e) => error_response(e),
    }
}
