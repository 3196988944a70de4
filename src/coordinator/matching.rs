//! Capability matching — fixed table from task type to required capabilities

use crate::types::Agent;

/// Well-known task type tags
///
/// Stored as plain strings on tasks so new types need no code change; these
/// constants cover the types the core itself submits.
pub mod task_type {
    /// Cross-repository cohesion analysis
    pub const COHESION_CHECK: &str = "cohesion:check";
    /// AI-assisted triage of an escalation
    pub const DEEP_ANALYSIS: &str = "analysis:deep";
    /// Repository structure scan
    pub const REPO_SCAN: &str = "repo:scan";
    /// Cross-repository sync
    pub const REPO_SYNC: &str = "repo:sync";
    /// Code generation / patching
    pub const CODE_PATCH: &str = "code:patch";
    /// Change review
    pub const REVIEW_CHANGES: &str = "review:changes";
}

/// Required capability tags for a task type.
///
/// An empty slice means any agent can handle the type.
pub fn required_capabilities(task_type: &str) -> &'static [&'static str] {
    match task_type {
        self::task_type::COHESION_CHECK => &["analyzer", "monitor"],
        self::task_type::DEEP_ANALYSIS => &["analyzer"],
        self::task_type::REPO_SCAN => &["monitor", "integrator"],
        self::task_type::REPO_SYNC => &["integrator"],
        self::task_type::CODE_PATCH => &["developer"],
        self::task_type::REVIEW_CHANGES => &["reviewer", "analyzer"],
        _ => &[],
    }
}

/// Whether an agent can handle a task type.
///
/// True when the type requires nothing, the agent's role is in the required
/// set, or any declared capability tag intersects the required set.
pub fn agent_can_handle(agent: &Agent, task_type: &str) -> bool {
    let required = required_capabilities(task_type);
    required.is_empty()
        || required.contains(&agent.role.as_str())
        || agent
            .capabilities
            .iter()
            .any(|cap| required.contains(&cap.as_str()))
}
