//! Orchestration Integration Tests
//!
//! Wires all three actors together (in-memory stores, recording fakes) and
//! exercises the cross-component loops: dead-letter → healing → retry job,
//! terminal task failure → pattern tracking, and snapshot-based restart.

use opsforge::config::{CoordinatorConfig, HealingConfig, QueueConfig};
use opsforge::coordinator::{SubmitRequest, TaskCoordinator, TaskCoordinatorHandle};
use opsforge::healing::{HealingEngine, HealingHandle, StrategyContext};
use opsforge::queue::{EnqueueRequest, JobQueue, JobQueueHandle};
use opsforge::resync::DisabledResync;
use opsforge::storage::{
    InMemoryKvStore, InMemorySnapshotStore, KvStore, SledSnapshotStore, SnapshotStore,
};
use opsforge::types::{AgentRole, JobPriority, TaskPriority, TaskStatus};

use std::sync::Arc;
use std::time::Duration;

struct Cluster {
    coordinator: TaskCoordinatorHandle,
    queue: JobQueueHandle,
    healing: HealingHandle,
    kv: Arc<dyn KvStore>,
}

fn spawn_cluster(snapshots: Arc<dyn SnapshotStore>) -> Cluster {
    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());

    let (coordinator_handle, coordinator_rx) = TaskCoordinatorHandle::channel();
    let (queue_handle, queue_rx) = JobQueueHandle::channel();
    let (healing_handle, healing_rx) = HealingHandle::channel();

    let coordinator = TaskCoordinator::new(
        coordinator_rx,
        healing_handle.clone(),
        snapshots.clone(),
        CoordinatorConfig::default(),
    );
    let queue = JobQueue::new(
        queue_rx,
        healing_handle.clone(),
        snapshots.clone(),
        QueueConfig::default(),
    );
    let engine = HealingEngine::new(
        healing_rx,
        StrategyContext {
            queue: queue_handle.clone(),
            coordinator: coordinator_handle.clone(),
            kv: kv.clone(),
            resync: Arc::new(DisabledResync),
            config: HealingConfig::default(),
        },
        snapshots,
    );

    tokio::spawn(coordinator.run());
    tokio::spawn(queue.run());
    tokio::spawn(engine.run());

    Cluster {
        coordinator: coordinator_handle,
        queue: queue_handle,
        healing: healing_handle,
        kv,
    }
}

/// Poll until the predicate holds or two seconds elapse
async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// A job that exhausts its retries dead-letters into the healing engine,
/// which schedules a high-priority retry job back into the queue.
#[tokio::test]
async fn test_dead_letter_feeds_healing_loop() {
    let cluster = spawn_cluster(InMemorySnapshotStore::shared());

    let job = cluster
        .queue
        .enqueue(EnqueueRequest {
            job_type: "repo:scan".to_string(),
            payload: serde_json::json!({"repo": "core"}),
            priority: JobPriority::Normal,
            max_retries: Some(0),
            scheduled_for: None,
        })
        .await
        .unwrap();

    let claimed = cluster.queue.dequeue("w1", None).await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);

    // Zero budget: the first failure dead-letters
    let dead = cluster
        .queue
        .fail(&job.id, "connect ETIMEDOUT 10.0.0.1:443", None)
        .await
        .unwrap();
    assert_eq!(dead.retry_count, 0);

    // The healing engine picks up the dead-letter asynchronously, matches
    // retry-transient, and schedules a delayed retry job
    let healing = cluster.healing.clone();
    let tracked = wait_until(|| {
        let healing = healing.clone();
        async move {
            healing
                .patterns()
                .await
                .map(|p| !p.is_empty())
                .unwrap_or(false)
        }
    })
    .await;
    assert!(tracked, "dead-letter report never reached the healing engine");

    let patterns = cluster.healing.patterns().await.unwrap();
    assert_eq!(patterns[0].auto_resolved, 1);
    assert_eq!(patterns[0].last_resolution.as_deref(), Some("retry-transient"));

    let stats = cluster.queue.stats().await.unwrap();
    assert_eq!(stats.lane_depths[JobPriority::High.lane_index()], 1);
}

/// A terminal task failure reaches the healing engine and, with an
/// unclassifiable error, produces exactly one warning escalation.
#[tokio::test]
async fn test_terminal_task_failure_escalates() {
    let cluster = spawn_cluster(InMemorySnapshotStore::shared());

    let agent = cluster
        .coordinator
        .register_agent("an-1", AgentRole::Analyzer, vec![])
        .await
        .unwrap();
    let task = cluster
        .coordinator
        .submit_task(SubmitRequest {
            task_type: "cohesion:check".to_string(),
            description: "scan".to_string(),
            input: serde_json::json!({}),
            priority: TaskPriority::Normal,
            parent_task_id: None,
        })
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Running);

    // "disk is purple" matches no strategy and no severity keyword.
    // The issue type carries "cohesion", so resync-repos matches first but
    // its action fails (service disabled) and resolution falls through.
    cluster
        .coordinator
        .fail_task(&task.id, &agent.id, "disk is purple", false)
        .await
        .unwrap();

    let healing = cluster.healing.clone();
    let escalated = wait_until(|| {
        let healing = healing.clone();
        async move {
            healing
                .escalations()
                .await
                .map(|e| e.len() == 1)
                .unwrap_or(false)
        }
    })
    .await;
    assert!(escalated, "task failure never escalated");

    let escalations = cluster.healing.escalations().await.unwrap();
    assert_eq!(
        escalations[0].severity,
        opsforge::types::EscalationSeverity::Warning
    );
    assert!(escalations[0].issue.contains("task:cohesion:check"));
}

/// Three repeats of an unclassifiable error trip the circuit breaker, whose
/// flag lives in the key-value store under the issue type.
#[tokio::test]
async fn test_repeat_failures_trip_breaker() {
    let cluster = spawn_cluster(InMemorySnapshotStore::shared());

    for _ in 0..2 {
        let report = cluster
            .healing
            .report_error(opsforge::types::IssueContext::new(
                "widget:press",
                "widget exploded",
            ))
            .await
            .unwrap();
        assert!(!report.auto_resolved);
    }

    let third = cluster
        .healing
        .report_error(opsforge::types::IssueContext::new(
            "widget:press",
            "widget exploded",
        ))
        .await
        .unwrap();
    assert!(third.auto_resolved);
    assert_eq!(third.strategy.as_deref(), Some("circuit-breaker"));
    assert!(cluster.kv.get("breaker:widget:press").unwrap().is_some());
}

/// Coordinator and queue state survive an actor restart via the shared
/// sled snapshot store.
#[tokio::test]
async fn test_cluster_restart_restores_state() {
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> =
        Arc::new(SledSnapshotStore::open_path(tmp.path().join("db")).unwrap());

    let task_id;
    let job_id;
    {
        let cluster = spawn_cluster(store.clone());
        let task = cluster
            .coordinator
            .submit_task(SubmitRequest {
                task_type: "repo:scan".to_string(),
                description: "scan all repos".to_string(),
                input: serde_json::json!({}),
                priority: TaskPriority::Normal,
                parent_task_id: None,
            })
            .await
            .unwrap();
        task_id = task.id;

        let job = cluster
            .queue
            .enqueue(EnqueueRequest {
                job_type: "repo:scan".to_string(),
                payload: serde_json::json!({}),
                priority: JobPriority::Normal,
                max_retries: None,
                scheduled_for: None,
            })
            .await
            .unwrap();
        job_id = job.id;
    }

    // Fresh actors over the same snapshot store
    let cluster = spawn_cluster(store);

    let task = cluster.coordinator.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    let job = cluster.queue.get_job(&job_id).await.unwrap();
    assert_eq!(job.job_type, "repo:scan");

    // The restored backlog is live: a capable agent claims the task
    let agent = cluster
        .coordinator
        .register_agent("mon-1", AgentRole::Monitor, vec![])
        .await
        .unwrap();
    let restored = cluster.coordinator.get_task(&task_id).await.unwrap();
    assert_eq!(restored.status, TaskStatus::Running);
    assert_eq!(restored.agent_id.as_deref(), Some(agent.id.as_str()));
}
