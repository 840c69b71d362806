//! Sweep worker and task handles

pub mod sweep_actor;
pub mod task;

pub use sweep_actor::{SweepActor, SweepScheduler, DEFAULT_EVENT_CAPACITY};
pub use task::{TaskHandle, TaskId, TaskStatus};
