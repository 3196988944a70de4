//! Task Coordinator actor — owns the agent registry and the task backlog

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::matching::{agent_can_handle, task_type};
use crate::config::CoordinatorConfig;
use crate::healing::HealingHandle;
use crate::storage::SnapshotStore;
use crate::types::{Agent, AgentRole, AgentStatus, Task, TaskPriority, TaskStatus};

/// Snapshot namespace in the snapshot store
const SNAPSHOT_NAMESPACE: &str = "task-coordinator";

/// Command channel depth
const COMMAND_BUFFER: usize = 256;

// ============================================================================
// Errors
// ============================================================================

/// Task Coordinator operation errors
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("agent {0} not found")]
    AgentNotFound(String),
    #[error("task {0} not found")]
    TaskNotFound(String),
    #[error("coordinator unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Commands
// ============================================================================

/// Task submission parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub task_type: String,
    pub description: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub priority: TaskPriority,
    pub parent_task_id: Option<String>,
}

/// Outcome of a `request_next_task` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOffer {
    /// The claimed task, if any
    pub task: Option<Task>,
    /// Why no task was handed out ("not idle" / "none suitable")
    pub reason: Option<String>,
}

impl TaskOffer {
    fn assigned(task: Task) -> Self {
        Self {
            task: Some(task),
            reason: None,
        }
    }

    fn empty(reason: &str) -> Self {
        Self {
            task: None,
            reason: Some(reason.to_string()),
        }
    }
}

/// Commands for the TaskCoordinator actor
#[derive(Debug)]
pub enum CoordinatorCommand {
    RegisterAgent {
        name: String,
        role: AgentRole,
        capabilities: Vec<String>,
        respond: oneshot::Sender<Agent>,
    },
    Heartbeat {
        agent_id: String,
        status: Option<AgentStatus>,
        respond: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    SubmitTask {
        request: SubmitRequest,
        respond: oneshot::Sender<Task>,
    },
    NextTask {
        agent_id: String,
        respond: oneshot::Sender<Result<TaskOffer, CoordinatorError>>,
    },
    CompleteTask {
        task_id: String,
        agent_id: String,
        output: Option<serde_json::Value>,
        respond: oneshot::Sender<Result<Task, CoordinatorError>>,
    },
    FailTask {
        task_id: String,
        agent_id: String,
        error: String,
        should_retry: bool,
        respond: oneshot::Sender<Result<Task, CoordinatorError>>,
    },
    Status {
        respond: oneshot::Sender<CoordinatorStatus>,
    },
    Agents {
        respond: oneshot::Sender<Vec<Agent>>,
    },
    GetTask {
        task_id: String,
        respond: oneshot::Sender<Result<Task, CoordinatorError>>,
    },
    AnalyzeCohesion {
        respond: oneshot::Sender<Task>,
    },
    /// Remediation hook: force an agent back to idle, reclaiming its task
    ResetAgent {
        agent_id: String,
        respond: oneshot::Sender<Result<Agent, CoordinatorError>>,
    },
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to interact with the TaskCoordinator actor
#[derive(Clone)]
pub struct TaskCoordinatorHandle {
    tx: mpsc::Sender<CoordinatorCommand>,
}

impl TaskCoordinatorHandle {
    /// Create the command channel; the receiver goes to [`TaskCoordinator::new`]
    pub fn channel() -> (Self, mpsc::Receiver<CoordinatorCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        (Self { tx }, rx)
    }

    async fn request<T>(
        &self,
        cmd: CoordinatorCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, CoordinatorError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|e| CoordinatorError::Unavailable(e.to_string()))?;
        rx.await
            .map_err(|e| CoordinatorError::Unavailable(e.to_string()))
    }

    pub async fn register_agent(
        &self,
        name: impl Into<String>,
        role: AgentRole,
        capabilities: Vec<String>,
    ) -> Result<Agent, CoordinatorError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            CoordinatorCommand::RegisterAgent {
                name: name.into(),
                role,
                capabilities,
                respond,
            },
            rx,
        )
        .await
    }

    pub async fn heartbeat(
        &self,
        agent_id: impl Into<String>,
        status: Option<AgentStatus>,
    ) -> Result<(), CoordinatorError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            CoordinatorCommand::Heartbeat {
                agent_id: agent_id.into(),
                status,
                respond,
            },
            rx,
        )
        .await?
    }

    pub async fn submit_task(&self, request: SubmitRequest) -> Result<Task, CoordinatorError> {
        let (respond, rx) = oneshot::channel();
        self.request(CoordinatorCommand::SubmitTask { request, respond }, rx)
            .await
    }

    pub async fn request_next_task(
        &self,
        agent_id: impl Into<String>,
    ) -> Result<TaskOffer, CoordinatorError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            CoordinatorCommand::NextTask {
                agent_id: agent_id.into(),
                respond,
            },
            rx,
        )
        .await?
    }

    pub async fn complete_task(
        &self,
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        output: Option<serde_json::Value>,
    ) -> Result<Task, CoordinatorError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            CoordinatorCommand::CompleteTask {
                task_id: task_id.into(),
                agent_id: agent_id.into(),
                output,
                respond,
            },
            rx,
        )
        .await?
    }

    pub async fn fail_task(
        &self,
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        error: impl Into<String>,
        should_retry: bool,
    ) -> Result<Task, CoordinatorError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            CoordinatorCommand::FailTask {
                task_id: task_id.into(),
                agent_id: agent_id.into(),
                error: error.into(),
                should_retry,
                respond,
            },
            rx,
        )
        .await?
    }

    pub async fn status(&self) -> Result<CoordinatorStatus, CoordinatorError> {
        let (respond, rx) = oneshot::channel();
        self.request(CoordinatorCommand::Status { respond }, rx).await
    }

    pub async fn agents(&self) -> Result<Vec<Agent>, CoordinatorError> {
        let (respond, rx) = oneshot::channel();
        self.request(CoordinatorCommand::Agents { respond }, rx).await
    }

    pub async fn get_task(&self, task_id: impl Into<String>) -> Result<Task, CoordinatorError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            CoordinatorCommand::GetTask {
                task_id: task_id.into(),
                respond,
            },
            rx,
        )
        .await?
    }

    /// Submit the fixed high-priority cohesion analysis task
    pub async fn analyze_cohesion(&self) -> Result<Task, CoordinatorError> {
        let (respond, rx) = oneshot::channel();
        self.request(CoordinatorCommand::AnalyzeCohesion { respond }, rx)
            .await
    }

    /// Force an agent back to idle, reclaiming any held task
    pub async fn reset_agent(
        &self,
        agent_id: impl Into<String>,
    ) -> Result<Agent, CoordinatorError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            CoordinatorCommand::ResetAgent {
                agent_id: agent_id.into(),
                respond,
            },
            rx,
        )
        .await?
    }
}

// ============================================================================
// Status
// ============================================================================

/// Aggregate counts returned by `status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub total_agents: usize,
    /// Agents not marked offline
    pub active_agents: usize,
    pub busy_agents: usize,
    pub idle_agents: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub backlog_depth: usize,
}

// ============================================================================
// Actor state
// ============================================================================

/// Serializable actor state, snapshotted after every mutation
#[derive(Debug, Default, Serialize, Deserialize)]
struct CoordinatorState {
    agents: HashMap<String, Agent>,
    /// Agent ids in registration order — assignment walks this
    registration_order: Vec<String>,
    tasks: HashMap<String, Task>,
    /// Task ids awaiting assignment, front is highest priority
    backlog: VecDeque<String>,
}

// ============================================================================
// Task Coordinator actor
// ============================================================================

/// Task Coordinator — single logical actor owning agents and tasks
pub struct TaskCoordinator {
    rx: mpsc::Receiver<CoordinatorCommand>,
    healing: HealingHandle,
    store: Arc<dyn SnapshotStore>,
    config: CoordinatorConfig,
    state: CoordinatorState,
}

impl TaskCoordinator {
    pub fn new(
        rx: mpsc::Receiver<CoordinatorCommand>,
        healing: HealingHandle,
        store: Arc<dyn SnapshotStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            rx,
            healing,
            store,
            config,
            state: CoordinatorState::default(),
        }
    }

    /// Run the coordinator actor loop (call from tokio::spawn)
    pub async fn run(mut self) {
        self.restore();

        let sweep_secs = self.config.sweep_interval_secs.max(1);
        let mut sweep = tokio::time::interval(std::time::Duration::from_secs(sweep_secs));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            agents = self.state.agents.len(),
            tasks = self.state.tasks.len(),
            sweep_secs = sweep_secs,
            "TaskCoordinator started"
        );

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = sweep.tick() => self.run_sweep(),
            }
        }

        info!("TaskCoordinator stopped");
    }

    fn handle(&mut self, cmd: CoordinatorCommand) {
        match cmd {
            CoordinatorCommand::RegisterAgent {
                name,
                role,
                capabilities,
                respond,
            } => {
                let _ = respond.send(self.register_agent(name, role, capabilities));
            }
            CoordinatorCommand::Heartbeat {
                agent_id,
                status,
                respond,
            } => {
                let _ = respond.send(self.heartbeat(&agent_id, status));
            }
            CoordinatorCommand::SubmitTask { request, respond } => {
                let _ = respond.send(self.submit_task(request));
            }
            CoordinatorCommand::NextTask { agent_id, respond } => {
                let _ = respond.send(self.request_next_task(&agent_id));
            }
            CoordinatorCommand::CompleteTask {
                task_id,
                agent_id,
                output,
                respond,
            } => {
                let _ = respond.send(self.complete_task(&task_id, &agent_id, output));
            }
            CoordinatorCommand::FailTask {
                task_id,
                agent_id,
                error,
                should_retry,
                respond,
            } => {
                let _ = respond.send(self.fail_task(&task_id, &agent_id, error, should_retry));
            }
            CoordinatorCommand::Status { respond } => {
                let _ = respond.send(self.status());
            }
            CoordinatorCommand::Agents { respond } => {
                let mut agents: Vec<Agent> = self.state.agents.values().cloned().collect();
                agents.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
                let _ = respond.send(agents);
            }
            CoordinatorCommand::GetTask { task_id, respond } => {
                let result = self
                    .state
                    .tasks
                    .get(&task_id)
                    .cloned()
                    .ok_or(CoordinatorError::TaskNotFound(task_id));
                let _ = respond.send(result);
            }
            CoordinatorCommand::AnalyzeCohesion { respond } => {
                let task = self.submit_task(SubmitRequest {
                    task_type: task_type::COHESION_CHECK.to_string(),
                    description: "Analyze cross-repository cohesion".to_string(),
                    input: serde_json::json!({}),
                    priority: TaskPriority::High,
                    parent_task_id: None,
                });
                let _ = respond.send(task);
            }
            CoordinatorCommand::ResetAgent { agent_id, respond } => {
                let _ = respond.send(self.reset_agent(&agent_id));
            }
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    fn register_agent(
        &mut self,
        name: String,
        role: AgentRole,
        capabilities: Vec<String>,
    ) -> Agent {
        let agent = Agent::new(name, role, capabilities);
        self.state.registration_order.push(agent.id.clone());
        self.state.agents.insert(agent.id.clone(), agent.clone());

        info!(
            agent_id = %agent.id,
            name = %agent.name,
            role = %agent.role,
            "Agent registered"
        );

        // A fresh idle agent may immediately pick up queued work
        self.try_assign_all();
        self.persist();
        agent
    }

    fn heartbeat(
        &mut self,
        agent_id: &str,
        status: Option<AgentStatus>,
    ) -> Result<(), CoordinatorError> {
        let agent = self
            .state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| CoordinatorError::AgentNotFound(agent_id.to_string()))?;

        agent.last_heartbeat = Utc::now();

        if let Some(status) = status {
            // Busy is earned by holding a task, never claimed via heartbeat
            if status == AgentStatus::Busy && agent.current_task_id.is_none() {
                warn!(agent_id = agent_id, "Heartbeat tried to claim busy without a task, ignored");
            } else {
                agent.status = status;
            }
        }

        self.persist();
        Ok(())
    }

    fn submit_task(&mut self, request: SubmitRequest) -> Task {
        let task = Task::new(
            request.task_type,
            request.description,
            request.input,
            request.priority,
            request.parent_task_id,
        );

        if task.priority.is_urgent() {
            self.state.backlog.push_front(task.id.clone());
        } else {
            self.state.backlog.push_back(task.id.clone());
        }
        self.state.tasks.insert(task.id.clone(), task.clone());

        debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = ?task.priority,
            backlog = self.state.backlog.len(),
            "Task submitted"
        );

        self.try_assign_all();
        self.persist();

        // Return the possibly-already-assigned task
        self.state
            .tasks
            .get(&task.id)
            .cloned()
            .unwrap_or(task)
    }

    fn request_next_task(&mut self, agent_id: &str) -> Result<TaskOffer, CoordinatorError> {
        let agent = self
            .state
            .agents
            .get(agent_id)
            .ok_or_else(|| CoordinatorError::AgentNotFound(agent_id.to_string()))?;

        if agent.status != AgentStatus::Idle {
            return Ok(TaskOffer::empty("not idle"));
        }

        match self.claim_for_agent(agent_id) {
            Some(task) => {
                self.persist();
                Ok(TaskOffer::assigned(task))
            }
            None => Ok(TaskOffer::empty("none suitable")),
        }
    }

    fn complete_task(
        &mut self,
        task_id: &str,
        agent_id: &str,
        output: Option<serde_json::Value>,
    ) -> Result<Task, CoordinatorError> {
        if !self.state.tasks.contains_key(task_id) {
            return Err(CoordinatorError::TaskNotFound(task_id.to_string()));
        }
        if !self.state.agents.contains_key(agent_id) {
            return Err(CoordinatorError::AgentNotFound(agent_id.to_string()));
        }

        if let Some(task) = self.state.tasks.get_mut(task_id) {
            task.status = TaskStatus::Completed;
            task.output = output;
            task.completed_at = Some(Utc::now());
        }
        if let Some(agent) = self.state.agents.get_mut(agent_id) {
            agent.status = AgentStatus::Idle;
            agent.current_task_id = None;
            agent.tasks_completed += 1;
        }

        info!(task_id = task_id, agent_id = agent_id, "Task completed");

        // Freed agent picks up queued work immediately
        self.try_assign_all();
        self.persist();

        self.state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::TaskNotFound(task_id.to_string()))
    }

    fn fail_task(
        &mut self,
        task_id: &str,
        agent_id: &str,
        error: String,
        should_retry: bool,
    ) -> Result<Task, CoordinatorError> {
        if !self.state.tasks.contains_key(task_id) {
            return Err(CoordinatorError::TaskNotFound(task_id.to_string()));
        }
        if !self.state.agents.contains_key(agent_id) {
            return Err(CoordinatorError::AgentNotFound(agent_id.to_string()));
        }

        if let Some(agent) = self.state.agents.get_mut(agent_id) {
            agent.status = AgentStatus::Idle;
            agent.current_task_id = None;
            agent.tasks_failed += 1;
        }

        let mut report_failure = false;
        if let Some(task) = self.state.tasks.get_mut(task_id) {
            if should_retry {
                // Retries take priority over fresh submissions
                task.status = TaskStatus::Retrying;
                task.agent_id = None;
                task.started_at = None;
                task.error = Some(error);
                self.state.backlog.push_front(task_id.to_string());

                info!(task_id = task_id, agent_id = agent_id, "Task failed, requeued for retry");
            } else {
                task.status = TaskStatus::Failed;
                task.error = Some(error);
                task.completed_at = Some(Utc::now());
                report_failure = true;

                warn!(task_id = task_id, agent_id = agent_id, "Task failed terminally");
            }
        }

        if report_failure {
            if let Some(task) = self.state.tasks.get(task_id) {
                // Best-effort; the failure itself is already durable
                self.healing.notify_task_failed(task.clone());
            }
        }

        self.try_assign_all();
        self.persist();

        self.state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::TaskNotFound(task_id.to_string()))
    }

    fn reset_agent(&mut self, agent_id: &str) -> Result<Agent, CoordinatorError> {
        if !self.state.agents.contains_key(agent_id) {
            return Err(CoordinatorError::AgentNotFound(agent_id.to_string()));
        }

        self.reclaim_agent_task(agent_id);
        if let Some(agent) = self.state.agents.get_mut(agent_id) {
            agent.status = AgentStatus::Idle;
            agent.current_task_id = None;
            agent.last_heartbeat = Utc::now();
        }

        info!(agent_id = agent_id, "Agent reset to idle");

        self.try_assign_all();
        self.persist();

        self.state
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::AgentNotFound(agent_id.to_string()))
    }

    fn status(&self) -> CoordinatorStatus {
        let agents = self.state.agents.values();
        let tasks = self.state.tasks.values();

        let mut status = CoordinatorStatus {
            total_agents: self.state.agents.len(),
            active_agents: 0,
            busy_agents: 0,
            idle_agents: 0,
            pending_tasks: 0,
            running_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            backlog_depth: self.state.backlog.len(),
        };

        for agent in agents {
            if agent.status != AgentStatus::Offline {
                status.active_agents += 1;
            }
            match agent.status {
                AgentStatus::Busy => status.busy_agents += 1,
                AgentStatus::Idle => status.idle_agents += 1,
                _ => {}
            }
        }

        for task in tasks {
            match task.status {
                TaskStatus::Pending | TaskStatus::Retrying => status.pending_tasks += 1,
                TaskStatus::Running => status.running_tasks += 1,
                TaskStatus::Completed => status.completed_tasks += 1,
                TaskStatus::Failed => status.failed_tasks += 1,
                TaskStatus::Cancelled => {}
            }
        }

        status
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    /// Greedy assignment: idle agents in registration order, each takes the
    /// first claimable backlog task it can handle
    fn try_assign_all(&mut self) {
        let agent_ids = self.state.registration_order.clone();
        for agent_id in agent_ids {
            let idle = self
                .state
                .agents
                .get(&agent_id)
                .is_some_and(|a| a.status == AgentStatus::Idle);
            if idle {
                let _ = self.claim_for_agent(&agent_id);
            }
        }
    }

    /// Scan the backlog front-to-back for the first task this agent can
    /// handle; assign it and return it
    fn claim_for_agent(&mut self, agent_id: &str) -> Option<Task> {
        let agent = self.state.agents.get(agent_id)?;

        let position = self.state.backlog.iter().position(|task_id| {
            self.state.tasks.get(task_id).is_some_and(|task| {
                task.is_claimable() && agent_can_handle(agent, &task.task_type)
            })
        })?;

        let task_id = self.state.backlog.remove(position)?;
        let now = Utc::now();

        let task = self.state.tasks.get_mut(&task_id)?;
        task.status = TaskStatus::Running;
        task.agent_id = Some(agent_id.to_string());
        task.started_at = Some(now);
        let assigned = task.clone();

        if let Some(agent) = self.state.agents.get_mut(agent_id) {
            agent.status = AgentStatus::Busy;
            agent.current_task_id = Some(task_id.clone());
        }

        info!(
            task_id = %task_id,
            task_type = %assigned.task_type,
            agent_id = agent_id,
            "Task assigned"
        );

        Some(assigned)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    fn run_sweep(&mut self) {
        let mut changed = false;
        changed |= self.sweep_stale_agents();
        changed |= self.purge_old_tasks();
        if changed {
            self.persist();
        }
    }

    /// Mark heartbeat-silent agents offline and reclaim their tasks
    fn sweep_stale_agents(&mut self) -> bool {
        let cutoff = Utc::now() - Duration::seconds(self.config.agent_stale_secs as i64);

        let stale_ids: Vec<String> = self
            .state
            .agents
            .values()
            .filter(|a| a.status != AgentStatus::Offline && a.last_heartbeat < cutoff)
            .map(|a| a.id.clone())
            .collect();

        for agent_id in &stale_ids {
            self.reclaim_agent_task(agent_id);
            if let Some(agent) = self.state.agents.get_mut(agent_id) {
                agent.status = AgentStatus::Offline;
                agent.current_task_id = None;
                warn!(
                    agent_id = %agent.id,
                    name = %agent.name,
                    "Agent heartbeat stale, marked offline"
                );
            }
        }

        !stale_ids.is_empty()
    }

    /// If the agent holds a running task, reset it to pending at the
    /// backlog front
    fn reclaim_agent_task(&mut self, agent_id: &str) {
        let task_id = self
            .state
            .agents
            .get(agent_id)
            .and_then(|a| a.current_task_id.clone());

        if let Some(task_id) = task_id {
            if let Some(task) = self.state.tasks.get_mut(&task_id) {
                if task.status == TaskStatus::Running {
                    task.status = TaskStatus::Pending;
                    task.agent_id = None;
                    task.started_at = None;
                    self.state.backlog.push_front(task_id.clone());
                    info!(task_id = %task_id, agent_id = agent_id, "Orphaned task reclaimed");
                }
            }
        }
    }

    /// Drop terminal tasks past the retention window
    fn purge_old_tasks(&mut self) -> bool {
        let cutoff = Utc::now() - Duration::hours(self.config.task_retention_hours as i64);

        let purge_ids: Vec<String> = self
            .state
            .tasks
            .values()
            .filter(|t| {
                t.status.is_terminal() && t.completed_at.is_some_and(|at| at < cutoff)
            })
            .map(|t| t.id.clone())
            .collect();

        for id in &purge_ids {
            self.state.tasks.remove(id);
            self.state.backlog.retain(|queued| queued != id);
        }

        if !purge_ids.is_empty() {
            info!(purged = purge_ids.len(), "Old terminal tasks purged");
        }
        !purge_ids.is_empty()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    fn restore(&mut self) {
        match self.store.load(SNAPSHOT_NAMESPACE) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(state) => {
                    self.state = state;
                    info!(
                        agents = self.state.agents.len(),
                        tasks = self.state.tasks.len(),
                        "TaskCoordinator snapshot restored"
                    );
                }
                Err(e) => {
                    error!(error = %e, "TaskCoordinator snapshot corrupted, starting empty");
                }
            },
            Ok(None) => debug!("No TaskCoordinator snapshot, starting empty"),
            Err(e) => error!(error = %e, "TaskCoordinator snapshot load failed, starting empty"),
        }
    }

    fn persist(&self) {
        let bytes = match serde_json::to_vec(&self.state) {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "TaskCoordinator state serialization failed");
                return;
            }
        };
        if let Err(e) = self.store.save(SNAPSHOT_NAMESPACE, &bytes) {
            error!(error = %e, "TaskCoordinator snapshot save failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemorySnapshotStore;

    fn spawn_coordinator() -> TaskCoordinatorHandle {
        let (healing, _healing_rx) = HealingHandle::channel();
        let (handle, rx) = TaskCoordinatorHandle::channel();
        let coordinator = TaskCoordinator::new(
            rx,
            healing,
            InMemorySnapshotStore::shared(),
            CoordinatorConfig::default(),
        );
        tokio::spawn(coordinator.run());
        handle
    }

    /// Direct-construction coordinator for synchronous internal tests
    fn bare_coordinator() -> TaskCoordinator {
        let (healing, _healing_rx) = HealingHandle::channel();
        let (_handle, rx) = TaskCoordinatorHandle::channel();
        TaskCoordinator::new(
            rx,
            healing,
            InMemorySnapshotStore::shared(),
            CoordinatorConfig::default(),
        )
    }

    fn submit(task_type: &str, priority: TaskPriority) -> SubmitRequest {
        SubmitRequest {
            task_type: task_type.to_string(),
            description: "test task".to_string(),
            input: serde_json::json!({}),
            priority,
            parent_task_id: None,
        }
    }

    #[tokio::test]
    async fn test_cohesion_check_end_to_end() {
        let coordinator = spawn_coordinator();

        // No agents: the task stays pending at the backlog head
        let task = coordinator
            .submit_task(submit(task_type::COHESION_CHECK, TaskPriority::High))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        // A developer cannot handle cohesion checks
        let dev = coordinator
            .register_agent("dev-1", AgentRole::Developer, vec![])
            .await
            .unwrap();
        let offer = coordinator.request_next_task(&dev.id).await.unwrap();
        assert!(offer.task.is_none());
        assert_eq!(offer.reason.as_deref(), Some("none suitable"));

        // An analyzer picks it up via registration-time auto-assignment
        let analyzer = coordinator
            .register_agent("an-1", AgentRole::Analyzer, vec![])
            .await
            .unwrap();

        let running = coordinator.get_task(&task.id).await.unwrap();
        assert_eq!(running.status, TaskStatus::Running);
        assert_eq!(running.agent_id.as_deref(), Some(analyzer.id.as_str()));

        // Busy/current-task invariant holds on the agent side too
        let agents = coordinator.agents().await.unwrap();
        let busy = agents.iter().find(|a| a.id == analyzer.id).unwrap();
        assert_eq!(busy.status, AgentStatus::Busy);
        assert_eq!(busy.current_task_id.as_deref(), Some(task.id.as_str()));
    }

    #[tokio::test]
    async fn test_request_next_task_pull_flow() {
        let coordinator = spawn_coordinator();

        let agent = coordinator
            .register_agent("an-1", AgentRole::Analyzer, vec![])
            .await
            .unwrap();

        // Nothing queued yet
        let offer = coordinator.request_next_task(&agent.id).await.unwrap();
        assert_eq!(offer.reason.as_deref(), Some("none suitable"));

        let task = coordinator
            .submit_task(submit(task_type::COHESION_CHECK, TaskPriority::Normal))
            .await
            .unwrap();
        // Auto-assignment grabbed it at submission
        assert_eq!(task.status, TaskStatus::Running);

        // A busy agent polling again is refused with a reason
        let offer = coordinator.request_next_task(&agent.id).await.unwrap();
        assert!(offer.task.is_none());
        assert_eq!(offer.reason.as_deref(), Some("not idle"));

        // Completion frees the agent and bumps the counter
        let done = coordinator
            .complete_task(&task.id, &agent.id, Some(serde_json::json!({"ok": true})))
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);

        let agents = coordinator.agents().await.unwrap();
        assert_eq!(agents[0].status, AgentStatus::Idle);
        assert_eq!(agents[0].tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_urgent_submission_jumps_backlog() {
        let coordinator = spawn_coordinator();

        let first = coordinator
            .submit_task(submit("adhoc:a", TaskPriority::Normal))
            .await
            .unwrap();
        let urgent = coordinator
            .submit_task(submit("adhoc:b", TaskPriority::Critical))
            .await
            .unwrap();

        let agent = coordinator
            .register_agent("w-1", AgentRole::Developer, vec![])
            .await
            .unwrap();

        // Auto-assignment at registration takes the backlog head: the urgent one
        let running = coordinator.get_task(&urgent.id).await.unwrap();
        assert_eq!(running.status, TaskStatus::Running);
        assert_eq!(running.agent_id.as_deref(), Some(agent.id.as_str()));

        let waiting = coordinator.get_task(&first.id).await.unwrap();
        assert_eq!(waiting.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_fail_with_retry_requeues_at_front() {
        let coordinator = spawn_coordinator();

        let agent = coordinator
            .register_agent("w-1", AgentRole::Developer, vec![])
            .await
            .unwrap();
        let other = coordinator
            .submit_task(submit("adhoc:other", TaskPriority::Normal))
            .await
            .unwrap();
        assert_eq!(other.status, TaskStatus::Running);

        let queued = coordinator
            .submit_task(submit("adhoc:queued", TaskPriority::Normal))
            .await
            .unwrap();
        assert_eq!(queued.status, TaskStatus::Pending);

        // Failing with retry puts the first task back at the backlog front,
        // ahead of the queued one, and the freed agent claims it again
        let failed = coordinator
            .fail_task(&other.id, &agent.id, "transient glitch", true)
            .await
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Running);
        assert_eq!(failed.agent_id.as_deref(), Some(agent.id.as_str()));

        let still_queued = coordinator.get_task(&queued.id).await.unwrap();
        assert_eq!(still_queued.status, TaskStatus::Pending);

        let agents = coordinator.agents().await.unwrap();
        assert_eq!(agents[0].tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let coordinator = spawn_coordinator();

        assert!(matches!(
            coordinator.heartbeat("ghost", None).await,
            Err(CoordinatorError::AgentNotFound(_))
        ));
        assert!(matches!(
            coordinator.get_task("ghost").await,
            Err(CoordinatorError::TaskNotFound(_))
        ));
        assert!(matches!(
            coordinator.request_next_task("ghost").await,
            Err(CoordinatorError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_cannot_claim_busy() {
        let coordinator = spawn_coordinator();
        let agent = coordinator
            .register_agent("w-1", AgentRole::Monitor, vec![])
            .await
            .unwrap();

        coordinator
            .heartbeat(&agent.id, Some(AgentStatus::Busy))
            .await
            .unwrap();

        let agents = coordinator.agents().await.unwrap();
        assert_eq!(agents[0].status, AgentStatus::Idle);
    }

    #[test]
    fn test_stale_agent_reclamation() {
        let mut coordinator = bare_coordinator();

        let agent = coordinator.register_agent(
            "w-1".to_string(),
            AgentRole::Analyzer,
            vec![],
        );
        let task = coordinator.submit_task(submit(task_type::COHESION_CHECK, TaskPriority::Normal));
        assert_eq!(
            coordinator.state.tasks[&task.id].status,
            TaskStatus::Running
        );

        // Age the heartbeat past the 5-minute threshold
        if let Some(a) = coordinator.state.agents.get_mut(&agent.id) {
            a.last_heartbeat = Utc::now() - Duration::minutes(6);
        }

        coordinator.run_sweep();

        let swept = &coordinator.state.agents[&agent.id];
        assert_eq!(swept.status, AgentStatus::Offline);
        assert!(swept.current_task_id.is_none());

        let reclaimed = &coordinator.state.tasks[&task.id];
        assert_eq!(reclaimed.status, TaskStatus::Pending);
        assert!(reclaimed.agent_id.is_none());
        assert_eq!(
            coordinator.state.backlog.front().map(String::as_str),
            Some(task.id.as_str())
        );
    }

    #[test]
    fn test_terminal_task_purge() {
        let mut coordinator = bare_coordinator();

        let agent = coordinator.register_agent("w-1".to_string(), AgentRole::Developer, vec![]);
        let task = coordinator.submit_task(submit("adhoc:x", TaskPriority::Normal));
        coordinator
            .complete_task(&task.id, &agent.id, None)
            .unwrap();

        // Age the completion past the 24h retention window
        if let Some(t) = coordinator.state.tasks.get_mut(&task.id) {
            t.completed_at = Some(Utc::now() - Duration::hours(25));
        }

        coordinator.run_sweep();
        assert!(!coordinator.state.tasks.contains_key(&task.id));
    }

    #[test]
    fn test_reset_agent_reclaims_task() {
        let mut coordinator = bare_coordinator();

        let agent = coordinator.register_agent("w-1".to_string(), AgentRole::Analyzer, vec![]);
        let task = coordinator.submit_task(submit(task_type::COHESION_CHECK, TaskPriority::Normal));
        assert_eq!(
            coordinator.state.tasks[&task.id].status,
            TaskStatus::Running
        );

        let reset = coordinator.reset_agent(&agent.id).unwrap();

        // Reset frees the agent; auto-assignment immediately hands the
        // reclaimed task back since it is the only idle candidate
        assert_eq!(
            coordinator.state.tasks[&task.id].agent_id.as_deref(),
            Some(reset.id.as_str())
        );
    }

    #[test]
    fn test_busy_iff_running_invariant() {
        let mut coordinator = bare_coordinator();

        coordinator.register_agent("w-1".to_string(), AgentRole::Analyzer, vec![]);
        coordinator.register_agent("w-2".to_string(), AgentRole::Developer, vec![]);
        coordinator.submit_task(submit(task_type::COHESION_CHECK, TaskPriority::Normal));
        coordinator.submit_task(submit("adhoc:x", TaskPriority::Low));

        for agent in coordinator.state.agents.values() {
            match agent.status {
                AgentStatus::Busy => {
                    let task_id = agent.current_task_id.as_ref().expect("busy without task");
                    let task = &coordinator.state.tasks[task_id];
                    assert_eq!(task.status, TaskStatus::Running);
                    assert_eq!(task.agent_id.as_deref(), Some(agent.id.as_str()));
                }
                _ => assert!(agent.current_task_id.is_none()),
            }
        }
    }
}
