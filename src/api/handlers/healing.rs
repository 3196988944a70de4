//! Self-Healing Engine endpoints

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::error;

use super::AppContext;
use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::healing::HealingError;
use crate::types::{IssueContext, Job, Task};

/// Map a healing error to the envelope, hiding internal detail
fn error_response(e: HealingError) -> Response {
    match e {
        HealingError::NotFound(_) => ApiErrorResponse::not_found(e.to_string()),
        HealingError::Unavailable(_) => {
            error!(error = %e, "Healing engine unavailable");
            ApiErrorResponse::service_unavailable("healing engine unavailable")
        }
    }
}

/// Failure report payload; the timestamp defaults to arrival time
#[derive(Debug, Deserialize)]
pub struct ReportErrorRequest {
    pub issue_type: String,
    pub error: String,
    pub stack: Option<String>,
    pub path: Option<String>,
    pub subject_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl From<ReportErrorRequest> for IssueContext {
    fn from(req: ReportErrorRequest) -> Self {
        Self {
            issue_type: req.issue_type,
            error: req.error,
            stack: req.stack,
            path: req.path,
            subject_id: req.subject_id,
            timestamp: Utc::now(),
            metadata: req.metadata,
        }
    }
}

/// POST /api/v1/healing/report-error
pub async fn report_error(
    State(ctx): State<AppContext>,
    Json(req): Json<ReportErrorRequest>,
) -> Response {
    match ctx.healing.report_error(req.into()).await {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TaskFailedRequest {
    pub task: Task,
}

/// POST /api/v1/healing/task-failed
pub async fn task_failed(
    State(ctx): State<AppContext>,
    Json(req): Json<TaskFailedRequest>,
) -> Response {
    match ctx.healing.task_failed(req.task).await {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeadJobRequest {
    pub job: Job,
}

/// POST /api/v1/healing/dead-job
pub async fn dead_job(
    State(ctx): State<AppContext>,
    Json(req): Json<DeadJobRequest>,
) -> Response {
    match ctx.healing.dead_job(req.job).await {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/healing/heal — manual single-pass remediation
pub async fn heal(
    State(ctx): State<AppContext>,
    Json(req): Json<ReportErrorRequest>,
) -> Response {
    match ctx.healing.manual_heal(req.into()).await {
        Ok(action) => ApiResponse::ok(action),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/healing/status
pub async fn status(State(ctx): State<AppContext>) -> Response {
    match ctx.healing.status().await {
        Ok(status) => ApiResponse::ok(status),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/healing/actions
pub async fn actions(State(ctx): State<AppContext>) -> Response {
    match ctx.healing.actions().await {
        Ok(actions) => ApiResponse::ok(actions),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/healing/patterns
pub async fn patterns(State(ctx): State<AppContext>) -> Response {
    match ctx.healing.patterns().await {
        Ok(patterns) => ApiResponse::ok(patterns),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/healing/escalations
pub async fn escalations(State(ctx): State<AppContext>) -> Response {
    match ctx.healing.escalations().await {
        Ok(escalations) => ApiResponse::ok(escalations),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveEscalationRequest {
    pub escalation_id: String,
}

/// POST /api/v1/healing/escalations/resolve
pub async fn resolve_escalation(
    State(ctx): State<AppContext>,
    Json(req): Json<ResolveEscalationRequest>,
) -> Response {
    match ctx.healing.resolve_escalation(&req.escalation_id).await {
        Ok(escalation) => ApiResponse::ok(escalation),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/healing/patterns/clear
pub async fn clear_patterns(State(ctx): State<AppContext>) -> Response {
    match ctx.healing.clear_patterns().await {
        Ok(count) => ApiResponse::ok(serde_json::json!({ "cleared": count })),
        Err(e) => error_response(e),
    }
}
