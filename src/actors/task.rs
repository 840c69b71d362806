//! Handles to queued sweeps.

use crate::error::{CancelledError, SweepError};
use crate::measurement::{CancelToken, SweepRequest, SweepResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use uuid::Uuid;

/// Unique identifier of a submitted sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a submitted sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting in the queue
    Pending,
    /// Owned by the worker
    Running,
    /// Finished with a result
    Succeeded,
    /// Finished with an error
    Failed,
    /// Cancelled before finishing
    Cancelled,
}

impl TaskStatus {
    /// True once the task can no longer change
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelOutcome {
    /// The task had not started and is now cancelled
    Dequeued,
    /// The task is running and will stop at its next stage boundary
    Signalled,
    /// The task had already finished
    Finished,
}

#[derive(Default)]
struct TaskState {
    result: Option<Arc<SweepResult>>,
    error: Option<Arc<SweepError>>,
}

struct TaskShared {
    id: TaskId,
    request: SweepRequest,
    cancel: CancelToken,
    state: Mutex<TaskState>,
    status: watch::Sender<TaskStatus>,
}

/// Cloneable reference to a submitted sweep.
///
/// The status moves `Pending → Running → Succeeded | Failed | Cancelled`
/// (or straight from `Pending` to `Cancelled`) and never changes after
/// reaching a terminal state.
#[derive(Clone)]
pub struct TaskHandle(Arc<TaskShared>);

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.0.id)
            .field("kind", &self.0.request.kind)
            .field("status", &self.status())
            .finish()
    }
}

impl TaskHandle {
    pub(crate) fn new(request: SweepRequest) -> Self {
        let (status, _) = watch::channel(TaskStatus::Pending);
        Self(Arc::new(TaskShared {
            id: TaskId::new(),
            request,
            cancel: CancelToken::new(),
            state: Mutex::new(TaskState::default()),
            status,
        }))
    }

    /// Identifier used in events
    pub fn id(&self) -> TaskId {
        self.0.id
    }

    /// What was submitted
    pub fn request(&self) -> &SweepRequest {
        &self.0.request
    }

    /// Current status
    pub fn status(&self) -> TaskStatus {
        *self.0.status.borrow()
    }

    /// The result, once the task has succeeded
    pub fn result(&self) -> Option<Arc<SweepResult>> {
        self.lock().result.clone()
    }

    /// The error, once the task has failed or been cancelled
    pub fn error(&self) -> Option<Arc<SweepError>> {
        self.lock().error.clone()
    }

    /// Wait for a terminal state and return its outcome.
    pub async fn wait(&self) -> Result<Arc<SweepResult>, Arc<SweepError>> {
        let mut rx = self.0.status.subscribe();
        // The sender lives as long as this handle, so the channel cannot close
        let _ = rx.wait_for(|status| status.is_terminal()).await;

        let state = self.lock();
        match (&state.result, &state.error) {
            (Some(result), _) => Ok(Arc::clone(result)),
            (None, Some(error)) => Err(Arc::clone(error)),
            (None, None) => Err(Arc::new(CancelledError { stage: None }.into())),
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.0.cancel
    }

    /// Move `Pending` to `Running`. Returns false if the task was cancelled
    /// while queued.
    pub(crate) fn try_start(&self) -> bool {
        let _guard = self.lock();
        self.0.status.send_if_modified(|status| {
            if *status == TaskStatus::Pending {
                *status = TaskStatus::Running;
                true
            } else {
                false
            }
        })
    }

    /// Record the outcome. Only the first terminal transition takes effect.
    pub(crate) fn finish(&self, outcome: Result<SweepResult, SweepError>) -> TaskStatus {
        let mut state = self.lock();
        let current = self.status();
        if current.is_terminal() {
            return current;
        }

        let status = match outcome {
            Ok(result) => {
                state.result = Some(Arc::new(result));
                TaskStatus::Succeeded
            }
            Err(error) => {
                let status = if error.is_cancelled() {
                    TaskStatus::Cancelled
                } else {
                    TaskStatus::Failed
                };
                state.error = Some(Arc::new(error));
                status
            }
        };
        self.0.status.send_replace(status);
        status
    }

    pub(crate) fn cancel(&self) -> CancelOutcome {
        let mut state = self.lock();
        match self.status() {
            TaskStatus::Pending => {
                state.error = Some(Arc::new(CancelledError { stage: None }.into()));
                self.0.status.send_replace(TaskStatus::Cancelled);
                CancelOutcome::Dequeued
            }
            TaskStatus::Running => {
                self.0.cancel.cancel();
                CancelOutcome::Signalled
            }
            _ => CancelOutcome::Finished,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
