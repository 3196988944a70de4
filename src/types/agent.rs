//! Agent registry types: AgentRole, AgentStatus, Agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a registered worker agent
///
/// Roles participate in capability matching: a task type that requires
/// e.g. `analyzer` can be claimed by any agent whose role is `analyzer`
/// even without an explicit capability tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Code/cohesion analysis (static analysis, dependency graphs)
    Analyzer,
    /// Repository and pipeline monitoring
    Monitor,
    /// Code generation and patching
    Developer,
    /// Pull-request and change review
    Reviewer,
    /// Cross-repository sync and merge work
    Integrator,
}

impl AgentRole {
    /// Role tag as used by the capability table
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Analyzer => "analyzer",
            AgentRole::Monitor => "monitor",
            AgentRole::Developer => "developer",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Integrator => "integrator",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of an agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered and ready for work
    #[default]
    Idle,
    /// Holds exactly one running task
    Busy,
    /// Reported an internal fault via heartbeat
    Error,
    /// Heartbeat silent past the staleness threshold
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// A registered worker agent
///
/// Invariant: `status == Busy` if and only if `current_task_id` is set and
/// the referenced task is `Running` with this agent's id attached. All
/// mutation goes through the coordinator actor, which maintains this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    /// Declared capability tags, matched against the task capability table
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    /// Present iff status is Busy
    pub current_task_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    /// Create a freshly registered idle agent
    pub fn new(name: impl Into<String>, role: AgentRole, capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            role,
            capabilities,
            status: AgentStatus::Idle,
            current_task_id: None,
            last_heartbeat: now,
            tasks_completed: 0,
            tasks_failed: 0,
            registered_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_agent_is_idle() {
        let agent = Agent::new("scanner-1", AgentRole::Monitor, vec!["scraper".into()]);
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task_id.is_none());
        assert_eq!(agent.tasks_completed, 0);
    }

    #[test]
    fn test_role_serde_lowercase() {
        let json = serde_json::to_string(&AgentRole::Analyzer).unwrap();
        assert_eq!(json, "\"analyzer\"");
    }
}
