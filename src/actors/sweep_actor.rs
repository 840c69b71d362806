//! Single-worker sweep scheduler.
//!
//! The worker task owns the [`Session`] outright, so instrument access is
//! serialized by construction: sweeps run one at a time in submission order,
//! and a sweep's wire traffic never interleaves with another's. Callers on any
//! thread submit through [`SweepScheduler`] without blocking and get a
//! [`TaskHandle`] back.

use super::task::{CancelOutcome, TaskHandle, TaskStatus};
use crate::error::CancelledError;
use crate::instrument::session::Session;
use crate::measurement::{MeasurementKind, SweepRequest, SweepRunner};
use crate::messages::{SweepCommand, SweepEvent};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Worker that owns the session and runs sweeps
pub struct SweepActor {
    session: Session,
    runner: SweepRunner,
    events: broadcast::Sender<SweepEvent>,
}

impl SweepActor {
    /// Actor owning `session`, publishing on `events`
    pub fn new(session: Session, runner: SweepRunner, events: broadcast::Sender<SweepEvent>) -> Self {
        Self {
            session,
            runner,
            events,
        }
    }

    /// Process commands until shutdown, then hand the session back.
    pub async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<SweepCommand>) -> Session {
        info!("Sweep worker started");

        while let Some(command) = command_rx.recv().await {
            match command {
                SweepCommand::Submit(task) => self.execute(task).await,

                SweepCommand::Shutdown { response } => {
                    info!("Shutdown command received");
                    command_rx.close();
                    while let Ok(leftover) = command_rx.try_recv() {
                        self.discard(leftover);
                    }
                    let _ = response.send(());
                    break;
                }
            }
        }

        info!("Sweep worker stopped");
        self.session
    }

    async fn execute(&mut self, task: TaskHandle) {
        let task_id = task.id();
        if !task.try_start() {
            debug!("Skipping task {} ({})", task_id, task.status());
            return;
        }

        self.emit(SweepEvent::Started { task_id });

        let events = self.events.clone();
        let outcome = self
            .runner
            .run(&mut self.session, task.request(), task.cancel_token(), |progress| {
                let _ = events.send(SweepEvent::Stage {
                    task_id,
                    progress: progress.clone(),
                });
            })
            .await;

        let event = match task.finish(outcome) {
            TaskStatus::Succeeded => task.result().map(|result| SweepEvent::Completed { task_id, result }),
            TaskStatus::Failed => task.error().map(|error| SweepEvent::Failed { task_id, error }),
            TaskStatus::Cancelled => Some(SweepEvent::Cancelled { task_id }),
            other => {
                error!("Task {} left in non-terminal state {}", task_id, other);
                None
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn discard(&self, command: SweepCommand) {
        match command {
            SweepCommand::Submit(task) => {
                if task.cancel() == CancelOutcome::Dequeued {
                    debug!("Cancelled task {} queued after shutdown", task.id());
                    self.emit(SweepEvent::Cancelled { task_id: task.id() });
                }
            }
            SweepCommand::Shutdown { response } => {
                let _ = response.send(());
            }
        }
    }

    fn emit(&self, event: SweepEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

/// Front end of the sweep worker
///
/// # Example
///
/// ```no_run
/// use tsp_daq::actors::SweepScheduler;
/// use tsp_daq::instrument::{Session, SessionConfig};
/// use tsp_daq::measurement::{MeasurementKind, ScriptCatalog, SweepRunner};
///
/// # async fn demo() -> anyhow::Result<()> {
/// let session = Session::open(SessionConfig::default()).await?;
/// let scheduler = SweepScheduler::start(session, SweepRunner::new(ScriptCatalog::default()));
///
/// let task = scheduler.submit(MeasurementKind::Output, "sample-7");
/// let result = task.wait().await;
///
/// if let Some(mut session) = scheduler.shutdown().await {
///     session.close().await;
/// }
/// # let _ = result;
/// # Ok(())
/// # }
/// ```
pub struct SweepScheduler {
    commands: mpsc::UnboundedSender<SweepCommand>,
    events: broadcast::Sender<SweepEvent>,
    // Keeps Queued events in queue order across submitting threads
    submit_lock: Mutex<()>,
    worker: JoinHandle<Session>,
}

impl SweepScheduler {
    /// Spawn the worker on the current Tokio runtime.
    pub fn start(session: Session, runner: SweepRunner) -> Self {
        Self::with_event_capacity(session, runner, DEFAULT_EVENT_CAPACITY)
    }

    /// Like [`SweepScheduler::start`] with a custom event buffer size.
    pub fn with_event_capacity(session: Session, runner: SweepRunner, capacity: usize) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(capacity.max(1));

        let actor = SweepActor::new(session, runner, events.clone());
        let worker = tokio::spawn(actor.run(command_rx));

        Self {
            commands,
            events,
            submit_lock: Mutex::new(()),
            worker,
        }
    }

    /// Queue a sweep of `kind` for `sample_id`.
    pub fn submit(&self, kind: MeasurementKind, sample_id: impl Into<String>) -> TaskHandle {
        self.submit_request(SweepRequest::new(kind, sample_id))
    }

    /// Queue a fully specified sweep request.
    pub fn submit_request(&self, request: SweepRequest) -> TaskHandle {
        let _guard = self.submit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.enqueue(request)
    }

    /// Queue several kinds for the same sample as one contiguous batch.
    pub fn submit_all(
        &self,
        kinds: impl IntoIterator<Item = MeasurementKind>,
        sample_id: &str,
    ) -> Vec<TaskHandle> {
        let _guard = self.submit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        kinds
            .into_iter()
            .map(|kind| self.enqueue(SweepRequest::new(kind, sample_id)))
            .collect()
    }

    fn enqueue(&self, request: SweepRequest) -> TaskHandle {
        let task = TaskHandle::new(request);
        let task_id = task.id();
        let _ = self.events.send(SweepEvent::Queued {
            task_id,
            kind: task.request().kind,
            sample_id: task.request().sample_id.clone(),
        });

        if self.commands.send(SweepCommand::Submit(task.clone())).is_err() {
            warn!("Sweep worker is gone, cancelling task {}", task_id);
            task.finish(Err(CancelledError { stage: None }.into()));
            let _ = self.events.send(SweepEvent::Cancelled { task_id });
        } else {
            debug!("Queued task {} ({})", task_id, task.request().kind);
        }
        task
    }

    /// Cancel a task.
    ///
    /// A pending task is cancelled immediately and will never touch the
    /// instrument. A running task stops at its next stage boundary. Returns
    /// false if the task had already finished.
    pub fn cancel(&self, task: &TaskHandle) -> bool {
        match task.cancel() {
            CancelOutcome::Dequeued => {
                info!("Cancelled queued task {}", task.id());
                let _ = self.events.send(SweepEvent::Cancelled { task_id: task.id() });
                true
            }
            CancelOutcome::Signalled => {
                info!("Cancellation requested for running task {}", task.id());
                true
            }
            CancelOutcome::Finished => false,
        }
    }

    /// Receive status events for every task submitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SweepEvent> {
        self.events.subscribe()
    }

    /// Finish everything already queued, stop the worker and return the
    /// session. Returns `None` if the worker panicked.
    ///
    /// Every event sender is gone once this returns, so subscribers receive
    /// the remaining events followed by `RecvError::Closed`.
    pub async fn shutdown(self) -> Option<Session> {
        let (command, done) = SweepCommand::shutdown();
        if self.commands.send(command).is_ok() {
            let _ = done.await;
        }
        drop(self.commands);
        drop(self.events);

        match self.worker.await {
            Ok(session) => Some(session),
            Err(e) => {
                error!("Sweep worker terminated abnormally: {}", e);
                None
            }
        }
    }
}
