//! API handlers, one submodule per component surface

pub mod coordinator;
pub mod healing;
pub mod queue;

use crate::coordinator::TaskCoordinatorHandle;
use crate::healing::HealingHandle;
use crate::queue::JobQueueHandle;

/// Shared handler state: one handle per component actor
#[derive(Clone)]
pub struct AppContext {
    pub coordinator: TaskCoordinatorHandle,
    pub queue: JobQueueHandle,
    pub healing: HealingHandle,
}
