//! Opsforge: task orchestration and self-healing for multi-repo automation
//!
//! Three tightly-coupled stateful services, each a single logical actor:
//!
//! - **Task Coordinator**: agent registry + capability-matched task assignment
//! - **Job Queue**: priority-laned backlog with retry/backoff and dead-lettering
//! - **Self-Healing Engine**: failure pattern tracking, strategy-based
//!   remediation, escalation
//!
//! Cross-component interaction goes exclusively through the actor handles;
//! state is snapshotted through a pluggable store after every mutation.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod healing;
pub mod queue;
pub mod resync;
pub mod storage;
pub mod types;

// Re-export core configuration
pub use config::CoreConfig;

// Re-export commonly used types
pub use types::{
    Agent, AgentRole, AgentStatus, ErrorPattern, Escalation, EscalationSeverity, HealAction,
    HealOutcome, IssueContext, Job, JobPriority, JobStatus, Task, TaskPriority, TaskStatus,
};

// Re-export the actor surfaces
pub use coordinator::{TaskCoordinator, TaskCoordinatorHandle};
pub use healing::{HealingEngine, HealingHandle};
pub use queue::{JobQueue, JobQueueHandle};

// Re-export storage traits
pub use storage::{KvStore, SnapshotStore, StorageError};
