//! Job Queue endpoints

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::error;

use super::AppContext;
use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::queue::{EnqueueRequest, QueueError};
use crate::types::{JobPriority, JobStatus};

/// Map a queue error to the envelope, hiding internal detail
fn error_response(e: QueueError) -> Response {
    match e {
        QueueError::NotFound(_) => ApiErrorResponse::not_found(e.to_string()),
        QueueError::Unavailable(_) => {
            error!(error = %e, "Job queue unavailable");
            ApiErrorResponse::service_unavailable("job queue unavailable")
        }
    }
}

/// POST /api/v1/queue/enqueue
pub async fn enqueue(
    State(ctx): State<AppContext>,
    Json(req): Json<EnqueueRequest>,
) -> Response {
    match ctx.queue.enqueue(req).await {
        Ok(job) => ApiResponse::ok(job),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DequeueRequest {
    pub worker_id: String,
    pub type_filter: Option<String>,
}

/// POST /api/v1/queue/dequeue
pub async fn dequeue(
    State(ctx): State<AppContext>,
    Json(req): Json<DequeueRequest>,
) -> Response {
    match ctx.queue.dequeue(req.worker_id, req.type_filter).await {
        Ok(job) => ApiResponse::ok(serde_json::json!({ "job": job })),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteJobRequest {
    pub job_id: String,
    pub result: Option<serde_json::Value>,
}

/// POST /api/v1/queue/complete
pub async fn complete(
    State(ctx): State<AppContext>,
    Json(req): Json<CompleteJobRequest>,
) -> Response {
    match ctx.queue.complete(&req.job_id, req.result).await {
        Ok(job) => ApiResponse::ok(job),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct FailJobRequest {
    pub job_id: String,
    pub error: String,
    pub should_retry: Option<bool>,
}

/// POST /api/v1/queue/fail
pub async fn fail(State(ctx): State<AppContext>, Json(req): Json<FailJobRequest>) -> Response {
    match ctx.queue.fail(&req.job_id, req.error, req.should_retry).await {
        Ok(job) => ApiResponse::ok(job),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/queue/job/:id
pub async fn get_job(State(ctx): State<AppContext>, Path(id): Path<String>) -> Response {
    match ctx.queue.get_job(&id).await {
        Ok(job) => ApiResponse::ok(job),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/queue/stats
pub async fn stats(State(ctx): State<AppContext>) -> Response {
    match ctx.queue.stats().await {
        Ok(stats) => ApiResponse::ok(stats),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default)]
    pub priority: JobPriority,
}

/// POST /api/v1/queue/schedule
pub async fn schedule(
    State(ctx): State<AppContext>,
    Json(req): Json<ScheduleRequest>,
) -> Response {
    match ctx
        .queue
        .schedule(req.job_type, req.payload, req.scheduled_for, req.priority)
        .await
    {
        Ok(job) => ApiResponse::ok(job),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/queue/retry-dead
pub async fn retry_dead(State(ctx): State<AppContext>) -> Response {
    match ctx.queue.retry_dead().await {
        Ok(count) => ApiResponse::ok(serde_json::json!({ "requeued": count })),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    pub older_than_hours: u64,
    pub statuses: Vec<JobStatus>,
}

/// POST /api/v1/queue/purge
pub async fn purge(State(ctx): State<AppContext>, Json(req): Json<PurgeRequest>) -> Response {
    match ctx.queue.purge(req.older_than_hours, req.statuses).await {
        Ok(count) => ApiResponse::ok(serde_json::json!({ "purged": count })),
        Err(e) => error_response(e),
    }
}
