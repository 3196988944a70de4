//! Job Queue — priority-laned backlog with retry/backoff and dead-lettering
//!
//! Four FIFO lanes (critical, high, normal, low) scanned in order on every
//! dequeue. Failures retry with exponential backoff (2^retry_count seconds,
//! front-of-lane reinsertion) until the budget is exhausted, at which point
//! the job dead-letters and the Self-Healing Engine is notified.

mod actor;

pub use actor::{
    EnqueueRequest, JobQueue, JobQueueHandle, QueueCommand, QueueError, QueueStats,
};
