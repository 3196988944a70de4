//! Resolution strategies — ordered (predicate, action) pairs
//!
//! The engine walks `default_strategies()` in order and applies the first
//! strategy whose predicate matches. Collaborators are passed explicitly
//! through [`StrategyContext`] so each strategy is testable with fakes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;

use super::signature::contains_any;
use crate::config::HealingConfig;
use crate::coordinator::TaskCoordinatorHandle;
use crate::queue::{EnqueueRequest, JobQueueHandle};
use crate::resync::ResyncService;
use crate::storage::KvStore;
use crate::types::{IssueContext, JobPriority, JobStatus};

/// Key prefix for cached credential entries
pub const CRED_PREFIX: &str = "cred:";

/// Key prefix for circuit-breaker flags
pub const BREAKER_PREFIX: &str = "breaker:";

/// Completed/failed jobs older than this are purged by resource cleanup (hours)
const CLEANUP_PURGE_HOURS: u64 = 12;

/// Collaborators available to every strategy action
pub struct StrategyContext {
    pub queue: JobQueueHandle,
    pub coordinator: TaskCoordinatorHandle,
    pub kv: Arc<dyn KvStore>,
    pub resync: Arc<dyn ResyncService>,
    pub config: HealingConfig,
}

/// One resolution strategy: a predicate over the issue and a remediation
/// action against the context's collaborators
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Strategy name, recorded as the resolution label
    fn name(&self) -> &'static str;

    /// Whether this strategy applies to the issue
    fn matches(&self, issue: &IssueContext) -> bool;

    /// Apply the remediation; the returned string describes what was done
    async fn apply(&self, issue: &IssueContext, ctx: &StrategyContext) -> Result<String>;
}

/// The fixed strategy list in resolution order
pub fn default_strategies() -> Vec<Box<dyn RecoveryStrategy>> {
    vec![
        Box::new(RetryTransient),
        Box::new(RefreshAuth),
        Box::new(ResourceCleanup),
        Box::new(CircuitBreaker),
        Box::new(ResyncRepos),
        Box::new(RestartAgent),
    ]
}

// ============================================================================
// retry-transient
// ============================================================================

/// Network blips and throttling: schedule a delayed high-priority retry job
struct RetryTransient;

const TRANSIENT_MARKERS: &[&str] = &[
    "econnreset",
    "connection reset",
    "etimedout",
    "timeout",
    "enotfound",
    "rate limit",
    "429",
    "503",
    "504",
    "network",
];

#[async_trait]
impl RecoveryStrategy for RetryTransient {
    fn name(&self) -> &'static str {
        "retry-transient"
    }

    fn matches(&self, issue: &IssueContext) -> bool {
        contains_any(&issue.error.to_lowercase(), TRANSIENT_MARKERS)
    }

    async fn apply(&self, issue: &IssueContext, ctx: &StrategyContext) -> Result<String> {
        let delay = Duration::seconds(ctx.config.retry_delay_secs as i64);
        let job = ctx
            .queue
            .schedule(
                "retry:transient",
                serde_json::json!({
                    "issue_type": issue.issue_type,
                    "subject_id": issue.subject_id,
                    "error": issue.error,
                }),
                Utc::now() + delay,
                JobPriority::High,
            )
            .await
            .context("Failed to schedule retry job")?;

        Ok(format!(
            "scheduled retry job {} in {}s",
            job.id, ctx.config.retry_delay_secs
        ))
    }
}

// ============================================================================
// refresh-auth
// ============================================================================

/// Expired or rejected credentials: drop the cached entries so the next
/// caller re-authenticates
struct RefreshAuth;

const AUTH_MARKERS: &[&str] = &["401", "403", "unauthorized", "forbidden", "token expired"];

#[async_trait]
impl RecoveryStrategy for RefreshAuth {
    fn name(&self) -> &'static str {
        "refresh-auth"
    }

    fn matches(&self, issue: &IssueContext) -> bool {
        contains_any(&issue.error.to_lowercase(), AUTH_MARKERS)
    }

    async fn apply(&self, _issue: &IssueContext, ctx: &StrategyContext) -> Result<String> {
        let removed = ctx
            .kv
            .delete_prefix(CRED_PREFIX)
            .context("Failed to invalidate credential cache")?;

        Ok(format!("invalidated {removed} cached credential entries"))
    }
}

// ============================================================================
// resource-cleanup
// ============================================================================

/// Capacity pressure: enqueue an urgent cleanup job and shed old queue state
struct ResourceCleanup;

const RESOURCE_MARKERS: &[&str] = &["memory", "storage", "quota", "limit exceeded"];

#[async_trait]
impl RecoveryStrategy for ResourceCleanup {
    fn name(&self) -> &'static str {
        "resource-cleanup"
    }

    fn matches(&self, issue: &IssueContext) -> bool {
        contains_any(&issue.error.to_lowercase(), RESOURCE_MARKERS)
    }

    async fn apply(&self, issue: &IssueContext, ctx: &StrategyContext) -> Result<String> {
        let job = ctx
            .queue
            .enqueue(EnqueueRequest {
                job_type: "cleanup:storage".to_string(),
                payload: serde_json::json!({ "trigger": issue.issue_type }),
                priority: JobPriority::Critical,
                max_retries: None,
                scheduled_for: None,
            })
            .await
            .context("Failed to enqueue cleanup job")?;

        let purged = ctx
            .queue
            .purge(
                CLEANUP_PURGE_HOURS,
                vec![JobStatus::Completed, JobStatus::Failed],
            )
            .await
            .context("Failed to purge old jobs")?;

        Ok(format!(
            "cleanup job {} enqueued, purged {purged} old jobs",
            job.id
        ))
    }
}

// ============================================================================
// circuit-breaker
// ============================================================================

/// Recurring signature: set a time-boxed breaker flag for the issue type.
///
/// Only fires once pattern tracking has injected `repeat_count >= 3`, which
/// means the first two occurrences of a recurring error always fall through
/// to the other strategies or to escalation.
struct CircuitBreaker;

/// Repeat count at which the breaker engages
const BREAKER_THRESHOLD: u64 = 3;

#[async_trait]
impl RecoveryStrategy for CircuitBreaker {
    fn name(&self) -> &'static str {
        "circuit-breaker"
    }

    fn matches(&self, issue: &IssueContext) -> bool {
        issue.repeat_count() >= BREAKER_THRESHOLD
    }

    async fn apply(&self, issue: &IssueContext, ctx: &StrategyContext) -> Result<String> {
        let cooldown = ctx.config.breaker_cooldown_secs;
        let key = format!("{BREAKER_PREFIX}{}", issue.issue_type);

        ctx.kv
            .put(
                &key,
                serde_json::json!({
                    "activated_at": Utc::now().to_rfc3339(),
                    "repeat_count": issue.repeat_count(),
                }),
                Some(Duration::seconds(cooldown as i64)),
            )
            .context("Failed to set breaker flag")?;

        Ok(format!(
            "circuit breaker activated for {} ({cooldown}s cooldown)",
            issue.issue_type
        ))
    }
}

// ============================================================================
// resync-repos
// ============================================================================

/// Sync/cohesion drift: trigger a full repository resync on the external
/// sync service
struct ResyncRepos;

#[async_trait]
impl RecoveryStrategy for ResyncRepos {
    fn name(&self) -> &'static str {
        "resync-repos"
    }

    fn matches(&self, issue: &IssueContext) -> bool {
        let lower = issue.issue_type.to_lowercase();
        lower.contains("sync") || lower.contains("cohesion")
    }

    async fn apply(&self, issue: &IssueContext, ctx: &StrategyContext) -> Result<String> {
        ctx.resync
            .trigger_resync(&issue.error)
            .await
            .context("Resync trigger failed")?;

        Ok("full repository resync triggered".to_string())
    }
}

// ============================================================================
// restart-agent
// ============================================================================

/// Stuck or unresponsive agent: reset it to idle via the coordinator
struct RestartAgent;

const AGENT_FAULT_MARKERS: &[&str] = &["stuck", "unresponsive", "timeout"];

#[async_trait]
impl RecoveryStrategy for RestartAgent {
    fn name(&self) -> &'static str {
        "restart-agent"
    }

    fn matches(&self, issue: &IssueContext) -> bool {
        issue.issue_type.to_lowercase().contains("agent")
            && contains_any(&issue.error.to_lowercase(), AGENT_FAULT_MARKERS)
    }

    async fn apply(&self, issue: &IssueContext, ctx: &StrategyContext) -> Result<String> {
        let agent_id = issue
            .metadata
            .get("agent_id")
            .and_then(serde_json::Value::as_str)
            .or(issue.subject_id.as_deref())
            .context("No agent id in issue context")?;

        let agent = ctx
            .coordinator
            .reset_agent(agent_id)
            .await
            .context("Agent reset failed")?;

        Ok(format!("agent {} reset to idle", agent.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(issue_type: &str, error: &str) -> IssueContext {
        IssueContext::new(issue_type, error)
    }

    #[test]
    fn test_strategy_order() {
        let names: Vec<&str> = default_strategies().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "retry-transient",
                "refresh-auth",
                "resource-cleanup",
                "circuit-breaker",
                "resync-repos",
                "restart-agent",
            ]
        );
    }

    #[test]
    fn test_transient_predicate() {
        let s = RetryTransient;
        assert!(s.matches(&issue("job:repo:scan", "connect ETIMEDOUT 10.0.0.1:443")));
        assert!(s.matches(&issue("job:repo:scan", "HTTP 503 from upstream")));
        assert!(s.matches(&issue("job:repo:scan", "rate limit exceeded")));
        assert!(!s.matches(&issue("job:repo:scan", "parse failure")));
    }

    #[test]
    fn test_auth_predicate() {
        let s = RefreshAuth;
        assert!(s.matches(&issue("job:repo:scan", "401 Unauthorized")));
        assert!(s.matches(&issue("job:repo:scan", "token expired for installation")));
        assert!(!s.matches(&issue("job:repo:scan", "500 internal error")));
    }

    #[test]
    fn test_breaker_predicate_needs_injected_count() {
        let s = CircuitBreaker;
        let mut ctx = issue("job:repo:scan", "weird failure");
        assert!(!s.matches(&ctx));

        ctx.metadata
            .insert("repeat_count".into(), serde_json::json!(2));
        assert!(!s.matches(&ctx));

        ctx.metadata
            .insert("repeat_count".into(), serde_json::json!(3));
        assert!(s.matches(&ctx));
    }

    #[test]
    fn test_resync_predicate() {
        let s = ResyncRepos;
        assert!(s.matches(&issue("task:repo:sync", "divergent state")));
        assert!(s.matches(&issue("task:cohesion:check", "graph mismatch")));
        assert!(!s.matches(&issue("task:code:patch", "divergent state")));
    }

    #[test]
    fn test_restart_agent_predicate_needs_both() {
        let s = RestartAgent;
        assert!(s.matches(&issue("agent:heartbeat", "agent stuck on task")));
        assert!(!s.matches(&issue("agent:heartbeat", "disk full")));
        assert!(!s.matches(&issue("job:repo:scan", "worker stuck")));
    }
}
