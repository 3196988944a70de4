//! API route definitions
//!
//! One route per named operation, grouped per component:
//! - /api/v1/coordinator/* — agent registry and task assignment
//! - /api/v1/queue/* — priority job queue
//! - /api/v1/healing/* — failure reporting and remediation

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{coordinator, healing, queue, AppContext};

/// Create all API routes
pub fn api_routes(ctx: AppContext) -> Router {
    Router::new()
        // Task Coordinator
        .route("/coordinator/register", post(coordinator::register))
        .route("/coordinator/heartbeat", post(coordinator::heartbeat))
        .route("/coordinator/task/submit", post(coordinator::submit_task))
        .route("/coordinator/task/next", post(coordinator::next_task))
        .route("/coordinator/task/complete", post(coordinator::complete_task))
        .route("/coordinator/task/fail", post(coordinator::fail_task))
        .route("/coordinator/status", get(coordinator::status))
        .route("/coordinator/agents", get(coordinator::agents))
        .route("/coordinator/task/:id", get(coordinator::get_task))
        .route("/coordinator/analyze-cohesion", post(coordinator::analyze_cohesion))
        // Job Queue
        .route("/queue/enqueue", post(queue::enqueue))
        .route("/queue/dequeue", post(queue::dequeue))
        .route("/queue/complete", post(queue::complete))
        .route("/queue/fail", post(queue::fail))
        .route("/queue/job/:id", get(queue::get_job))
        .route("/queue/stats", get(queue::stats))
        .route("/queue/schedule", post(queue::schedule))
        .route("/queue/retry-dead", post(queue::retry_dead))
        .route("/queue/purge", post(queue::purge))
        // Self-Healing Engine
        .route("/healing/report-error", post(healing::report_error))
        .route("/healing/task-failed", post(healing::task_failed))
        .route("/healing/dead-job", post(healing::dead_job))
        .route("/healing/heal", post(healing::heal))
        .route("/healing/status", get(healing::status))
        .route("/healing/actions", get(healing::actions))
        .route("/healing/patterns", get(healing::patterns))
        .route("/healing/escalations", get(healing::escalations))
        .route("/healing/escalations/resolve", post(healing::resolve_escalation))
        .route("/healing/patterns/clear", post(healing::clear_patterns))
        .with_state(ctx)
}
