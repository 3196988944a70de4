//! Self-Healing Engine actor — pattern tracking, resolution, escalation

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::signature::{normalize_signature, severity_for};
use super::strategies::{default_strategies, RecoveryStrategy, StrategyContext, BREAKER_PREFIX};
use crate::coordinator::{task_type, SubmitRequest};
use crate::storage::SnapshotStore;
use crate::types::{
    ErrorPattern, Escalation, HealAction, HealOutcome, IssueContext, Job, Task, TaskPriority,
};

/// Snapshot namespace in the snapshot store
const SNAPSHOT_NAMESPACE: &str = "self-healing";

/// Command channel depth
const COMMAND_BUFFER: usize = 256;

/// Recent patterns attached to a deep-analysis task
const ANALYSIS_PATTERN_COUNT: usize = 10;

// ============================================================================
// Errors
// ============================================================================

/// Self-Healing Engine operation errors
#[derive(Debug, thiserror::Error)]
pub enum HealingError {
    #[error("escalation {0} not found")]
    NotFound(String),
    #[error("healing engine unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Commands
// ============================================================================

/// Result of a `report_error` pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealReport {
    pub auto_resolved: bool,
    /// Strategy that resolved the issue, when any did
    pub strategy: Option<String>,
    /// Human-readable description of the action taken
    pub action: String,
    /// Escalation created when resolution failed
    pub escalation_id: Option<String>,
}

/// Commands for the HealingEngine actor
#[derive(Debug)]
pub enum HealingCommand {
    ReportError {
        issue: IssueContext,
        respond: oneshot::Sender<HealReport>,
    },
    /// Terminal task failure from the coordinator; `respond` is `None` for
    /// the best-effort notification path
    TaskFailed {
        task: Task,
        respond: Option<oneshot::Sender<HealReport>>,
    },
    /// Dead-lettered job from the queue; `respond` is `None` for the
    /// best-effort notification path
    DeadJob {
        job: Job,
        respond: Option<oneshot::Sender<HealReport>>,
    },
    ManualHeal {
        issue: IssueContext,
        respond: oneshot::Sender<HealAction>,
    },
    Status {
        respond: oneshot::Sender<HealingStatus>,
    },
    Actions {
        respond: oneshot::Sender<Vec<HealAction>>,
    },
    Patterns {
        respond: oneshot::Sender<Vec<ErrorPattern>>,
    },
    Escalations {
        respond: oneshot::Sender<Vec<Escalation>>,
    },
    ResolveEscalation {
        escalation_id: String,
        respond: oneshot::Sender<Result<Escalation, HealingError>>,
    },
    ClearPatterns {
        respond: oneshot::Sender<usize>,
    },
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to interact with the HealingEngine actor
#[derive(Clone)]
pub struct HealingHandle {
    tx: mpsc::Sender<HealingCommand>,
}

impl HealingHandle {
    /// Create the command channel; the receiver goes to [`HealingEngine::new`]
    pub fn channel() -> (Self, mpsc::Receiver<HealingCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        (Self { tx }, rx)
    }

    async fn request<T>(
        &self,
        cmd: HealingCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, HealingError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|e| HealingError::Unavailable(e.to_string()))?;
        rx.await
            .map_err(|e| HealingError::Unavailable(e.to_string()))
    }

    /// Run the full report pipeline: track, resolve, escalate
    pub async fn report_error(&self, issue: IssueContext) -> Result<HealReport, HealingError> {
        let (respond, rx) = oneshot::channel();
        self.request(HealingCommand::ReportError { issue, respond }, rx)
            .await
    }

    /// Report a terminal task failure and wait for the outcome
    pub async fn task_failed(&self, task: Task) -> Result<HealReport, HealingError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            HealingCommand::TaskFailed {
                task,
                respond: Some(respond),
            },
            rx,
        )
        .await
    }

    /// Report a dead-lettered job and wait for the outcome
    pub async fn dead_job(&self, job: Job) -> Result<HealReport, HealingError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            HealingCommand::DeadJob {
                job,
                respond: Some(respond),
            },
            rx,
        )
        .await
    }

    /// Best-effort task-failure notification from the coordinator.
    ///
    /// Never blocks the calling actor; a full or closed channel is logged
    /// and dropped.
    pub fn notify_task_failed(&self, task: Task) {
        if let Err(e) = self.tx.try_send(HealingCommand::TaskFailed {
            task,
            respond: None,
        }) {
            warn!(error = %e, "Dropped task-failure report to healing engine");
        }
    }

    /// Best-effort dead-letter notification from the queue.
    pub fn notify_dead_job(&self, job: Job) {
        if let Err(e) = self.tx.try_send(HealingCommand::DeadJob {
            job,
            respond: None,
        }) {
            warn!(error = %e, "Dropped dead-job report to healing engine");
        }
    }

    /// Run resolution once and record the outcome, without pattern tracking
    /// or escalation
    pub async fn manual_heal(&self, issue: IssueContext) -> Result<HealAction, HealingError> {
        let (respond, rx) = oneshot::channel();
        self.request(HealingCommand::ManualHeal { issue, respond }, rx)
            .await
    }

    pub async fn status(&self) -> Result<HealingStatus, HealingError> {
        let (respond, rx) = oneshot::channel();
        self.request(HealingCommand::Status { respond }, rx).await
    }

    pub async fn actions(&self) -> Result<Vec<HealAction>, HealingError> {
        let (respond, rx) = oneshot::channel();
        self.request(HealingCommand::Actions { respond }, rx).await
    }

    pub async fn patterns(&self) -> Result<Vec<ErrorPattern>, HealingError> {
        let (respond, rx) = oneshot::channel();
        self.request(HealingCommand::Patterns { respond }, rx).await
    }

    pub async fn escalations(&self) -> Result<Vec<Escalation>, HealingError> {
        let (respond, rx) = oneshot::channel();
        self.request(HealingCommand::Escalations { respond }, rx)
            .await
    }

    pub async fn resolve_escalation(
        &self,
        escalation_id: impl Into<String>,
    ) -> Result<Escalation, HealingError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            HealingCommand::ResolveEscalation {
                escalation_id: escalation_id.into(),
                respond,
            },
            rx,
        )
        .await?
    }

    /// Wipe all tracked signatures, returning the count removed
    pub async fn clear_patterns(&self) -> Result<usize, HealingError> {
        let (respond, rx) = oneshot::channel();
        self.request(HealingCommand::ClearPatterns { respond }, rx)
            .await
    }
}

// ============================================================================
// Status
// ============================================================================

/// Aggregate counts returned by `status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingStatus {
    pub tracked_patterns: usize,
    pub open_escalations: usize,
    pub total_escalations: usize,
    pub actions_recorded: usize,
    /// Sum of auto-resolutions across all patterns
    pub auto_resolved_total: u64,
    /// Unexpired circuit-breaker flags
    pub active_breakers: usize,
}

// ============================================================================
// Actor state
// ============================================================================

/// Serializable actor state, snapshotted after every mutation
#[derive(Debug, Default, Serialize, Deserialize)]
struct HealingState {
    patterns: HashMap<String, ErrorPattern>,
    escalations: Vec<Escalation>,
    actions: Vec<HealAction>,
}

// ============================================================================
// Self-Healing Engine actor
// ============================================================================

/// Self-Healing Engine — single logical actor owning patterns, escalations
/// and action records
pub struct HealingEngine {
    rx: mpsc::Receiver<HealingCommand>,
    strategies: Vec<Box<dyn RecoveryStrategy>>,
    ctx: StrategyContext,
    store: Arc<dyn SnapshotStore>,
    state: HealingState,
}

impl HealingEngine {
    pub fn new(
        rx: mpsc::Receiver<HealingCommand>,
        ctx: StrategyContext,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            rx,
            strategies: default_strategies(),
            ctx,
            store,
            state: HealingState::default(),
        }
    }

    /// Run the healing actor loop (call from tokio::spawn)
    pub async fn run(mut self) {
        self.restore();

        let sweep_secs = self.ctx.config.sweep_interval_secs.max(1);
        let mut sweep = tokio::time::interval(std::time::Duration::from_secs(sweep_secs));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            strategies = self.strategies.len(),
            patterns = self.state.patterns.len(),
            sweep_secs = sweep_secs,
            "HealingEngine started"
        );

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                _ = sweep.tick() => self.run_sweep(),
            }
        }

        info!("HealingEngine stopped");
    }

    async fn handle(&mut self, cmd: HealingCommand) {
        match cmd {
            HealingCommand::ReportError { issue, respond } => {
                let report = self.report_error(issue).await;
                let _ = respond.send(report);
            }
            HealingCommand::TaskFailed { task, respond } => {
                let issue = Self::issue_from_task(&task);
                let report = self.report_error(issue).await;
                if let Some(respond) = respond {
                    let _ = respond.send(report);
                }
            }
            HealingCommand::DeadJob { job, respond } => {
                let issue = Self::issue_from_job(&job);
                let report = self.report_error(issue).await;
                if let Some(respond) = respond {
                    let _ = respond.send(report);
                }
            }
            HealingCommand::ManualHeal { issue, respond } => {
                let action = self.manual_heal(issue).await;
                let _ = respond.send(action);
            }
            HealingCommand::Status { respond } => {
                let _ = respond.send(self.status());
            }
            HealingCommand::Actions { respond } => {
                let mut actions = self.state.actions.clone();
                actions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                let _ = respond.send(actions);
            }
            HealingCommand::Patterns { respond } => {
                let mut patterns: Vec<ErrorPattern> =
                    self.state.patterns.values().cloned().collect();
                patterns.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
                let _ = respond.send(patterns);
            }
            HealingCommand::Escalations { respond } => {
                let _ = respond.send(self.state.escalations.clone());
            }
            HealingCommand::ResolveEscalation {
                escalation_id,
                respond,
            } => {
                let _ = respond.send(self.resolve_escalation(&escalation_id));
            }
            HealingCommand::ClearPatterns { respond } => {
                let count = self.state.patterns.len();
                self.state.patterns.clear();
                info!(cleared = count, "Error patterns cleared");
                self.persist();
                let _ = respond.send(count);
            }
        }
    }

    // ------------------------------------------------------------------
    // Adapters
    // ------------------------------------------------------------------

    fn issue_from_task(task: &Task) -> IssueContext {
        let mut issue = IssueContext::new(
            format!("task:{}", task.task_type),
            task.error.clone().unwrap_or_else(|| "unknown error".to_string()),
        );
        issue.subject_id = Some(task.id.clone());
        if let Some(agent_id) = &task.agent_id {
            issue
                .metadata
                .insert("agent_id".into(), serde_json::json!(agent_id));
        }
        issue
    }

    fn issue_from_job(job: &Job) -> IssueContext {
        let mut issue = IssueContext::new(
            format!("job:{}", job.job_type),
            job.error.clone().unwrap_or_else(|| "unknown error".to_string()),
        );
        issue.subject_id = Some(job.id.clone());
        issue
            .metadata
            .insert("retry_count".into(), serde_json::json!(job.retry_count));
        issue
    }

    // ------------------------------------------------------------------
    // Report pipeline
    // ------------------------------------------------------------------

    /// Track the signature, walk the strategies, escalate on failure
    async fn report_error(&mut self, mut issue: IssueContext) -> HealReport {
        let signature = normalize_signature(&issue.error);
        let repeat_count = self.track_pattern(&signature);
        issue
            .metadata
            .insert("repeat_count".into(), serde_json::json!(repeat_count));

        debug!(
            issue_type = %issue.issue_type,
            signature = %signature,
            repeat_count = repeat_count,
            "Failure reported"
        );

        match self.resolve(&issue).await {
            Some((strategy, detail)) => {
                if let Some(pattern) = self.state.patterns.get_mut(&signature) {
                    pattern.last_resolution = Some(strategy.clone());
                    pattern.auto_resolved += 1;
                }
                self.state.actions.push(HealAction::new(
                    issue.issue_type.clone(),
                    Some(strategy.clone()),
                    HealOutcome::Resolved,
                    detail.clone(),
                ));

                info!(
                    issue_type = %issue.issue_type,
                    strategy = %strategy,
                    action = %detail,
                    "Issue auto-resolved"
                );

                self.persist();
                HealReport {
                    auto_resolved: true,
                    strategy: Some(strategy),
                    action: detail,
                    escalation_id: None,
                }
            }
            None => {
                let severity = severity_for(&issue.error);
                let escalation = Escalation::new(
                    format!("{}: {}", issue.issue_type, issue.error),
                    severity,
                    repeat_count,
                );
                let escalation_id = escalation.id.clone();

                self.state.actions.push(HealAction::new(
                    issue.issue_type.clone(),
                    None,
                    HealOutcome::Escalated,
                    format!("escalated as {severity}"),
                ));
                self.state.escalations.push(escalation);

                warn!(
                    issue_type = %issue.issue_type,
                    severity = %severity,
                    escalation_id = %escalation_id,
                    "No strategy resolved the issue, escalated"
                );

                if self.ctx.config.deep_analysis {
                    self.submit_deep_analysis(&escalation_id, severity.to_string());
                }

                self.persist();
                HealReport {
                    auto_resolved: false,
                    strategy: None,
                    action: "escalated".to_string(),
                    escalation_id: Some(escalation_id),
                }
            }
        }
    }

    /// Increment or create the pattern for a signature, returning the new count
    fn track_pattern(&mut self, signature: &str) -> u64 {
        match self.state.patterns.get_mut(signature) {
            Some(pattern) => {
                pattern.occurrences += 1;
                pattern.last_seen = Utc::now();
                pattern.occurrences
            }
            None => {
                self.state
                    .patterns
                    .insert(signature.to_string(), ErrorPattern::new(signature));
                1
            }
        }
    }

    /// Walk the strategy list; first matching strategy whose action succeeds
    /// wins. A failing action is logged and falls through.
    async fn resolve(&self, issue: &IssueContext) -> Option<(String, String)> {
        for strategy in &self.strategies {
            if !strategy.matches(issue) {
                continue;
            }

            debug!(strategy = strategy.name(), "Strategy matched, applying");
            match strategy.apply(issue, &self.ctx).await {
                Ok(detail) => return Some((strategy.name().to_string(), detail)),
                Err(e) => {
                    warn!(
                        strategy = strategy.name(),
                        error = %e,
                        "Strategy action failed, falling through"
                    );
                }
            }
        }
        None
    }

    /// Single resolution pass with a durable action record; no pattern
    /// tracking, no escalation
    async fn manual_heal(&mut self, issue: IssueContext) -> HealAction {
        let action = match self.resolve(&issue).await {
            Some((strategy, detail)) => HealAction::new(
                issue.issue_type.clone(),
                Some(strategy),
                HealOutcome::Resolved,
                detail,
            ),
            None => HealAction::new(
                issue.issue_type.clone(),
                None,
                HealOutcome::Failed,
                "no strategy matched or succeeded",
            ),
        };

        info!(
            issue_type = %issue.issue_type,
            outcome = ?action.outcome,
            "Manual heal executed"
        );

        self.state.actions.push(action.clone());
        self.persist();
        action
    }

    /// Fire-and-forget deep-analysis task referencing the escalation
    fn submit_deep_analysis(&self, escalation_id: &str, severity: String) {
        let mut recent: Vec<&ErrorPattern> = self.state.patterns.values().collect();
        recent.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        let patterns: Vec<serde_json::Value> = recent
            .iter()
            .take(ANALYSIS_PATTERN_COUNT)
            .map(|p| {
                serde_json::json!({
                    "signature": p.signature,
                    "occurrences": p.occurrences,
                })
            })
            .collect();

        let request = SubmitRequest {
            task_type: task_type::DEEP_ANALYSIS.to_string(),
            description: format!("Deep analysis of escalation {escalation_id}"),
            input: serde_json::json!({
                "escalation_id": escalation_id,
                "severity": severity,
                "recent_patterns": patterns,
            }),
            priority: TaskPriority::High,
            parent_task_id: None,
        };

        let coordinator = self.ctx.coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.submit_task(request).await {
                warn!(error = %e, "Deep-analysis task submission failed");
            }
        });
    }

    fn resolve_escalation(&mut self, escalation_id: &str) -> Result<Escalation, HealingError> {
        let escalation = self
            .state
            .escalations
            .iter_mut()
            .find(|e| e.id == escalation_id)
            .ok_or_else(|| HealingError::NotFound(escalation_id.to_string()))?;

        escalation.resolved_at = Some(Utc::now());
        let resolved = escalation.clone();

        info!(escalation_id = escalation_id, "Escalation resolved");
        self.persist();
        Ok(resolved)
    }

    fn status(&self) -> HealingStatus {
        let open = self
            .state
            .escalations
            .iter()
            .filter(|e| e.resolved_at.is_none())
            .count();
        let auto_resolved_total = self.state.patterns.values().map(|p| p.auto_resolved).sum();
        let active_breakers = self
            .ctx
            .kv
            .count_prefix(BREAKER_PREFIX)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Breaker count failed");
                0
            });

        HealingStatus {
            tracked_patterns: self.state.patterns.len(),
            open_escalations: open,
            total_escalations: self.state.escalations.len(),
            actions_recorded: self.state.actions.len(),
            auto_resolved_total,
            active_breakers,
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    fn run_sweep(&mut self) {
        match self.ctx.kv.sweep_expired() {
            Ok(0) => {}
            Ok(expired) => debug!(expired = expired, "Expired breaker flags removed"),
            Err(e) => warn!(error = %e, "Breaker expiry sweep failed"),
        }

        let escalation_cutoff =
            Utc::now() - Duration::days(self.ctx.config.escalation_retention_days as i64);
        let action_cutoff =
            Utc::now() - Duration::hours(self.ctx.config.action_retention_hours as i64);

        let before_esc = self.state.escalations.len();
        self.state
            .escalations
            .retain(|e| e.resolved_at.map_or(true, |at| at > escalation_cutoff));

        let before_act = self.state.actions.len();
        self.state.actions.retain(|a| a.timestamp > action_cutoff);

        let dropped = (before_esc - self.state.escalations.len())
            + (before_act - self.state.actions.len());
        if dropped > 0 {
            debug!(dropped = dropped, "Old escalations and actions pruned");
            self.persist();
        }
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
                        patterns = self.state.patterns.len(),
                        escalations = self.state.escalations.len(),
                        "HealingEngine snapshot restored"
                    );
                }
                Err(e) => {
                    error!(error = %e, "HealingEngine snapshot corrupted, starting empty");
                }
            },
            Ok(None) => debug!("No HealingEngine snapshot, starting empty"),
            Err(e) => error!(error = %e, "HealingEngine snapshot load failed, starting empty"),
        }
    }

    fn persist(&self) {
        let bytes = match serde_json::to_vec(&self.state) {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "HealingEngine state serialization failed");
                return;
            }
        };
        if let Err(e) = self.store.save(SNAPSHOT_NAMESPACE, &bytes) {
            error!(error = %e, "HealingEngine snapshot save failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
