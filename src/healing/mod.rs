//! Self-Healing Engine — failure pattern tracking, remediation, escalation
//!
//! Consumes failure reports from the Task Coordinator, the Job Queue and
//! external callers. Every report is normalized into an error signature and
//! counted; an ordered strategy list is walked and the first matching
//! strategy whose action succeeds resolves the issue. Anything unresolved
//! becomes an escalation for human or deep-analysis review.

mod engine;
mod signature;
mod strategies;

pub use engine::{
    HealReport, HealingCommand, HealingEngine, HealingError, HealingHandle, HealingStatus,
};
pub use signature::{normalize_signature, severity_for};
pub use strategies::{default_strategies, RecoveryStrategy, StrategyContext};
