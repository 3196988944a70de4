//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and exercise
//! the /api/v1/* endpoints using `tower::ServiceExt::oneshot()`.
//! No binary spawn, no network port — runs in CI without `#[ignore]`.

use opsforge::api::{create_app, AppContext};
use opsforge::config::{CoordinatorConfig, HealingConfig, QueueConfig};
use opsforge::coordinator::{TaskCoordinator, TaskCoordinatorHandle};
use opsforge::healing::{HealingEngine, HealingHandle, StrategyContext};
use opsforge::queue::{JobQueue, JobQueueHandle};
use opsforge::resync::DisabledResync;
use opsforge::storage::{InMemoryKvStore, InMemorySnapshotStore};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use tower::ServiceExt;

/// Wire the three actors with in-memory stores and return the app router
fn create_test_app() -> Router {
    let (coordinator_handle, coordinator_rx) = TaskCoordinatorHandle::channel();
    let (queue_handle, queue_rx) = JobQueueHandle::channel();
    let (healing_handle, healing_rx) = HealingHandle::channel();

    let coordinator = TaskCoordinator::new(
        coordinator_rx,
        healing_handle.clone(),
        InMemorySnapshotStore::shared(),
        CoordinatorConfig::default(),
    );
    let queue = JobQueue::new(
        queue_rx,
        healing_handle.clone(),
        InMemorySnapshotStore::shared(),
        QueueConfig::default(),
    );
    let engine = HealingEngine::new(
        healing_rx,
        StrategyContext {
            queue: queue_handle.clone(),
            coordinator: coordinator_handle.clone(),
            kv: Arc::new(InMemoryKvStore::new()),
            resync: Arc::new(DisabledResync),
            config: HealingConfig::default(),
        },
        InMemorySnapshotStore::shared(),
    );

    tokio::spawn(coordinator.run());
    tokio::spawn(queue.run());
    tokio::spawn(engine.run());

    create_app(AppContext {
        coordinator: coordinator_handle,
        queue: queue_handle,
        healing: healing_handle,
    })
}

async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn post(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let resp = app
        .clone()
        .oneshot(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// All GET endpoints return 200 with the envelope shape.
#[tokio::test]
async fn test_get_endpoints_return_envelope() {
    let app = create_test_app();

    let endpoints = [
        "/api/v1/coordinator/status",
        "/api/v1/coordinator/agents",
        "/api/v1/queue/stats",
        "/api/v1/healing/status",
        "/api/v1/healing/actions",
        "/api/v1/healing/patterns",
        "/api/v1/healing/escalations",
    ];

    for endpoint in &endpoints {
        let (status, json) = get(&app, endpoint).await;
        assert_eq!(status, StatusCode::OK, "GET {endpoint}");
        assert!(json.get("data").is_some(), "GET {endpoint} missing data");
        assert_eq!(json["meta"]["version"], "1", "GET {endpoint} missing meta");
    }
}

/// Register → submit → next → complete over HTTP.
#[tokio::test]
async fn test_task_lifecycle_over_http() {
    let app = create_test_app();

    let (status, agent) = post(
        &app,
        "/api/v1/coordinator/register",
        serde_json::json!({"name": "an-1", "role": "analyzer", "capabilities": []}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let agent_id = agent["data"]["id"].as_str().unwrap().to_string();

    let (status, task) = post(
        &app,
        "/api/v1/coordinator/task/submit",
        serde_json::json!({
            "task_type": "cohesion:check",
            "description": "scan repo graph",
            "input": {"repo": "core"},
            "priority": "high",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let task_id = task["data"]["id"].as_str().unwrap().to_string();
    // The only idle analyzer got it at submission
    assert_eq!(task["data"]["status"], "running");
    assert_eq!(task["data"]["agent_id"], agent_id.as_str());

    let (status, done) = post(
        &app,
        "/api/v1/coordinator/task/complete",
        serde_json::json!({
            "task_id": task_id,
            "agent_id": agent_id,
            "output": {"cohesion": 0.93},
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["data"]["status"], "completed");

    let (status, fetched) = get(&app, &format!("/api/v1/coordinator/task/{task_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["data"]["output"]["cohesion"], 0.93);
}

/// Unknown ids map to 404 with the error envelope.
#[tokio::test]
async fn test_not_found_mapping() {
    let app = create_test_app();

    let (status, json) = get(&app, "/api/v1/coordinator/task/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");

    let (status, _) = get(&app, "/api/v1/queue/job/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post(
        &app,
        "/api/v1/healing/escalations/resolve",
        serde_json::json!({"escalation_id": "ghost"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Enqueue/dequeue/complete over HTTP, including the priority scan.
#[tokio::test]
async fn test_job_lifecycle_over_http() {
    let app = create_test_app();

    let (_, low) = post(
        &app,
        "/api/v1/queue/enqueue",
        serde_json::json!({"job_type": "repo:scan", "payload": {}, "priority": "low"}),
    )
    .await;
    let (_, critical) = post(
        &app,
        "/api/v1/queue/enqueue",
        serde_json::json!({"job_type": "repo:scan", "payload": {}, "priority": "critical"}),
    )
    .await;

    let (status, claimed) = post(
        &app,
        "/api/v1/queue/dequeue",
        serde_json::json!({"worker_id": "w1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claimed["data"]["job"]["id"], critical["data"]["id"]);

    let (status, done) = post(
        &app,
        "/api/v1/queue/complete",
        serde_json::json!({
            "job_id": claimed["data"]["job"]["id"],
            "result": {"ok": true},
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["data"]["status"], "completed");

    let (_, stats) = get(&app, "/api/v1/queue/stats").await;
    assert_eq!(stats["data"]["completed"], 1);
    assert_eq!(stats["data"]["total_jobs"], 2);

    // The low job is still waiting
    let low_id = low["data"]["id"].as_str().unwrap();
    let (_, fetched) = get(&app, &format!("/api/v1/queue/job/{low_id}")).await;
    assert_eq!(fetched["data"]["status"], "pending");
}

/// report-error resolves a transient failure and records the pattern.
#[tokio::test]
async fn test_report_error_over_http() {
    let app = create_test_app();

    let (status, report) = post(
        &app,
        "/api/v1/healing/report-error",
        serde_json::json!({
            "issue_type": "job:repo:scan",
            "error": "connect ETIMEDOUT 10.0.0.1:443",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["data"]["auto_resolved"], true);
    assert_eq!(report["data"]["strategy"], "retry-transient");

    let (_, patterns) = get(&app, "/api/v1/healing/patterns").await;
    assert_eq!(patterns["data"].as_array().unwrap().len(), 1);

    let (_, cleared) = post(&app, "/api/v1/healing/patterns/clear", serde_json::json!({})).await;
    assert_eq!(cleared["data"]["cleared"], 1);
}

/// An unmatched error escalates and the escalation is resolvable over HTTP.
#[tokio::test]
async fn test_escalation_over_http() {
    let app = create_test_app();

    let (_, report) = post(
        &app,
        "/api/v1/healing/report-error",
        serde_json::json!({"issue_type": "sensor:color", "error": "disk is purple"}),
    )
    .await;
    assert_eq!(report["data"]["auto_resolved"], false);
    let escalation_id = report["data"]["escalation_id"].as_str().unwrap().to_string();

    let (_, escalations) = get(&app, "/api/v1/healing/escalations").await;
    assert_eq!(escalations["data"][0]["severity"], "warning");

    let (status, resolved) = post(
        &app,
        "/api/v1/healing/escalations/resolve",
        serde_json::json!({"escalation_id": escalation_id}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(resolved["data"]["resolved_at"].is_string());
}

/// analyze-cohesion submits the fixed high-priority task.
#[tokio::test]
async fn test_analyze_cohesion_over_http() {
    let app = create_test_app();

    let (status, task) = post(&app, "/api/v1/coordinator/analyze-cohesion", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["data"]["task_type"], "cohesion:check");
    assert_eq!(task["data"]["priority"], "high");
    assert_eq!(task["data"]["status"], "pending");
}
