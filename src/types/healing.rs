//! Self-healing types: IssueContext, ErrorPattern, Escalation, HealAction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Structured failure report consumed by the Self-Healing Engine
///
/// Built by external callers or by the `task_failed`/`dead_job` adapters.
/// `metadata` is free-form; the pattern tracker injects `repeat_count` into
/// it before the strategy walk so the circuit-breaker predicate can see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueContext {
    /// Issue type tag, e.g. "task:cohesion:check" or "job:repo:scan"
    pub issue_type: String,
    /// Raw error text, normalized for pattern tracking
    pub error: String,
    pub stack: Option<String>,
    pub path: Option<String>,
    /// Task or job id the failure belongs to, when known
    pub subject_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl IssueContext {
    pub fn new(issue_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            issue_type: issue_type.into(),
            error: error.into(),
            stack: None,
            path: None,
            subject_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Repeat count injected by the pattern tracker, zero before injection
    pub fn repeat_count(&self) -> u64 {
        self.metadata
            .get("repeat_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
    }
}

/// A recurring error signature tracked across failure reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    /// Normalized signature string — the tracking key
    pub signature: String,
    pub occurrences: u64,
    pub last_seen: DateTime<Utc>,
    /// Strategy name of the last successful resolution for this signature
    pub last_resolution: Option<String>,
    pub auto_resolved: u64,
}

impl ErrorPattern {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            occurrences: 1,
            last_seen: Utc::now(),
            last_resolution: None,
            auto_resolved: 0,
        }
    }
}

/// Severity of an escalation, derived from a keyword heuristic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EscalationSeverity {
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for EscalationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EscalationSeverity::Warning => "warning",
            EscalationSeverity::Error => "error",
            EscalationSeverity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// A failure no automatic strategy could resolve, awaiting review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: String,
    pub issue: String,
    pub severity: EscalationSeverity,
    /// How many resolution attempts preceded this escalation
    pub attempts: u64,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Escalation {
    pub fn new(issue: impl Into<String>, severity: EscalationSeverity, attempts: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            issue: issue.into(),
            severity,
            attempts,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

/// Outcome of a remediation attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealOutcome {
    Resolved,
    Failed,
    Escalated,
}

/// Durable record of one remediation attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealAction {
    pub id: String,
    pub issue_type: String,
    /// Strategy that ran, or None when nothing matched
    pub strategy: Option<String>,
    pub outcome: HealOutcome,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl HealAction {
    pub fn new(
        issue_type: impl Into<String>,
        strategy: Option<String>,
        outcome: HealOutcome,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            issue_type: issue_type.into(),
            strategy,
            outcome,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}
