//! Message types for the sweep worker
//!
//! Commands flow from the scheduler to the worker over an unbounded FIFO queue;
//! events flow back to any number of subscribers over a broadcast channel.

use crate::actors::task::{TaskHandle, TaskId};
use crate::error::SweepError;
use crate::measurement::{MeasurementKind, SweepProgress, SweepResult};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Commands processed by the sweep worker in arrival order
#[derive(Debug)]
pub enum SweepCommand {
    /// Run a queued sweep
    Submit(TaskHandle),

    /// Stop the worker once everything queued before this command is done
    Shutdown { response: oneshot::Sender<()> },
}

impl SweepCommand {
    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}

/// Status notifications published by the scheduler and its worker
#[derive(Debug, Clone)]
pub enum SweepEvent {
    /// Accepted into the queue
    Queued {
        /// Task
        task_id: TaskId,
        /// Requested measurement
        kind: MeasurementKind,
        /// Requested sample
        sample_id: String,
    },
    /// Picked up by the worker
    Started {
        /// Task
        task_id: TaskId,
    },
    /// Entered a stage of one of its steps
    Stage {
        /// Task
        task_id: TaskId,
        /// Step and stage being entered
        progress: SweepProgress,
    },
    /// Finished with a result
    Completed {
        /// Task
        task_id: TaskId,
        /// Shared with the task handle
        result: Arc<SweepResult>,
    },
    /// Finished with an error other than cancellation
    Failed {
        /// Task
        task_id: TaskId,
        /// Shared with the task handle
        error: Arc<SweepError>,
    },
    /// Cancelled while queued or at a stage boundary
    Cancelled {
        /// Task
        task_id: TaskId,
    },
}

impl SweepEvent {
    /// Task the event refers to
    pub fn task_id(&self) -> TaskId {
        match self {
            SweepEvent::Queued { task_id, .. }
            | SweepEvent::Started { task_id }
            | SweepEvent::Stage { task_id, .. }
            | SweepEvent::Completed { task_id, .. }
            | SweepEvent::Failed { task_id, .. }
            | SweepEvent::Cancelled { task_id } => *task_id,
        }
    }

    /// True for the last event a task produces
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SweepEvent::Completed { .. } | SweepEvent::Failed { .. } | SweepEvent::Cancelled { .. }
        )
    }
}
