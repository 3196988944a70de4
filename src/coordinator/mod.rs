//! Task Coordinator — agent registry and capability-matched task assignment
//!
//! Owns every Agent and Task. Assignment is greedy, not globally optimal: on
//! each submission, completion or failure the idle agents are walked in
//! registration order and each takes the first backlog task it can handle.
//! Urgent submissions and retries insert at the backlog front, which yields
//! FIFO-within-priority behavior.

mod actor;
mod matching;

pub use actor::{
    CoordinatorCommand, CoordinatorError, CoordinatorStatus, SubmitRequest, TaskCoordinator,
    TaskCoordinatorHandle, TaskOffer,
};
pub use matching::{agent_can_handle, required_capabilities, task_type};
