//! Sweep orchestration: load → run → read → assemble, step by step.
//!
//! A sweep never retries. The first failure ends it with an error tagged with
//! the stage it happened in, and cancellation is honoured at every stage
//! boundary. Completion of the instrument-side script is not signalled; the
//! buffer readback is the completion point, optionally preceded by a fixed
//! settle delay.

use super::{MeasurementKind, ScriptCatalog, StepResult, SweepResult, SweepStep};
use crate::error::{CancelledError, SweepError};
use crate::instrument::buffer::read_buffer;
use crate::instrument::script::{load_script, run_script, ScriptDescriptor};
use crate::instrument::session::Session;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stage of a single sweep step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SweepStage {
    /// Uploading the step's script
    Loading,
    /// Starting the script
    Running,
    /// Reading buffers back
    Reading,
    /// Building the step table
    Assembling,
}

impl fmt::Display for SweepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What to measure and for which sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRequest {
    /// Measurement to run
    pub kind: MeasurementKind,
    /// Sample the results are filed under
    pub sample_id: String,
    /// Accept steps whose buffers are all empty
    #[serde(default)]
    pub allow_empty: bool,
}

impl SweepRequest {
    /// Request that rejects empty buffers
    pub fn new(kind: MeasurementKind, sample_id: impl Into<String>) -> Self {
        Self {
            kind,
            sample_id: sample_id.into(),
            allow_empty: false,
        }
    }

    /// Builder for [`SweepRequest::allow_empty`]
    pub fn allow_empty(mut self, allow: bool) -> Self {
        self.allow_empty = allow;
        self
    }
}

/// Cooperative cancellation flag shared between a caller and a running sweep
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Token that has not been triggered
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation at the next stage boundary
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress notification emitted on every stage entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepProgress {
    /// Label of the current step
    pub step_label: String,
    /// Zero-based index of the step
    pub step_index: usize,
    /// Steps in the whole sweep
    pub step_count: usize,
    /// Stage being entered
    pub stage: SweepStage,
}

/// Runs measurement kinds against a session
#[derive(Debug, Clone)]
pub struct SweepRunner {
    catalog: ScriptCatalog,
    readback_delay: Duration,
}

impl SweepRunner {
    /// Runner over `catalog` with no readback delay
    pub fn new(catalog: ScriptCatalog) -> Self {
        Self {
            catalog,
            readback_delay: Duration::ZERO,
        }
    }

    /// Wait this long between starting a script and reading its buffers
    pub fn with_readback_delay(mut self, delay: Duration) -> Self {
        self.readback_delay = delay;
        self
    }

    /// Scripts used for each measurement kind
    pub fn catalog(&self) -> &ScriptCatalog {
        &self.catalog
    }

    /// Run every step of `request.kind` in order.
    ///
    /// The session must be `Connected`; otherwise a
    /// [`SweepError::Connection`] is returned before anything is loaded.
    /// `progress` is called once on entry to each stage of each step.
    pub async fn run<F>(
        &self,
        session: &mut Session,
        request: &SweepRequest,
        cancel: &CancelToken,
        mut progress: F,
    ) -> Result<SweepResult, SweepError>
    where
        F: FnMut(&SweepProgress) + Send,
    {
        session.ensure_ready()?;

        let steps = self.catalog.steps(request.kind);
        let started_at = Utc::now();
        info!(
            "Starting {} sweep for sample '{}' ({} steps)",
            request.kind,
            request.sample_id,
            steps.len()
        );

        session.begin_sweep();
        let outcome = self
            .run_steps(session, &steps, request.allow_empty, cancel, &mut progress)
            .await;
        session.end_sweep();

        match outcome {
            Ok(steps) => {
                let result = SweepResult {
                    kind: request.kind,
                    sample_id: request.sample_id.clone(),
                    steps,
                    started_at,
                    finished_at: Utc::now(),
                };
                info!(
                    "{} sweep for '{}' finished in {:.1} min",
                    request.kind,
                    request.sample_id,
                    result.elapsed().as_secs_f64() / 60.0
                );
                Ok(result)
            }
            Err(e) => {
                warn!("{} sweep for '{}' ended: {}", request.kind, request.sample_id, e);
                Err(e)
            }
        }
    }

    /// Load, run and read back one script outside the catalogue.
    ///
    /// Stages, cancellation and error tagging are the same as for a single
    /// catalogue step; the step is labelled with the script name.
    pub async fn run_descriptor<F>(
        &self,
        session: &mut Session,
        descriptor: &ScriptDescriptor,
        allow_empty: bool,
        cancel: &CancelToken,
        mut progress: F,
    ) -> Result<StepResult, SweepError>
    where
        F: FnMut(&SweepProgress) + Send,
    {
        session.ensure_ready()?;

        let step = SweepStep::new(descriptor.name.clone(), descriptor.clone());
        info!("Running script '{}'", descriptor.name);

        session.begin_sweep();
        let outcome = self
            .run_step(session, &step, 0, 1, allow_empty, cancel, &mut progress)
            .await;
        session.end_sweep();

        if let Err(e) = &outcome {
            warn!("Script '{}' ended: {}", descriptor.name, e);
        }
        outcome
    }

    async fn run_steps<F>(
        &self,
        session: &mut Session,
        steps: &[SweepStep],
        allow_empty: bool,
        cancel: &CancelToken,
        progress: &mut F,
    ) -> Result<Vec<StepResult>, SweepError>
    where
        F: FnMut(&SweepProgress) + Send,
    {
        let step_count = steps.len();
        let mut results = Vec::with_capacity(step_count);

        for (step_index, step) in steps.iter().enumerate() {
            let result = self
                .run_step(session, step, step_index, step_count, allow_empty, cancel, progress)
                .await?;
            results.push(result);
        }

        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step<F>(
        &self,
        session: &mut Session,
        step: &SweepStep,
        step_index: usize,
        step_count: usize,
        allow_empty: bool,
        cancel: &CancelToken,
        progress: &mut F,
    ) -> Result<StepResult, SweepError>
    where
        F: FnMut(&SweepProgress) + Send,
    {
        let mut enter = |stage: SweepStage| -> Result<(), CancelledError> {
            if cancel.is_cancelled() {
                return Err(CancelledError { stage: Some(stage) });
            }
            info!("Step '{}': {}", step.label, stage);
            progress(&SweepProgress {
                step_label: step.label.clone(),
                step_index,
                step_count,
                stage,
            });
            Ok(())
        };

        enter(SweepStage::Loading)?;
        load_script(session, &step.descriptor)
            .await
            .map_err(|source| SweepError::Loading {
                step: step.label.clone(),
                source,
            })?;

        enter(SweepStage::Running)?;
        run_script(session)
            .await
            .map_err(|source| SweepError::Running {
                step: step.label.clone(),
                source,
            })?;

        if !self.readback_delay.is_zero() {
            debug!("Waiting {:?} before readback", self.readback_delay);
            tokio::time::sleep(self.readback_delay).await;
        }

        enter(SweepStage::Reading)?;
        let table = read_buffer(session, &step.descriptor.channels, allow_empty)
            .await
            .map_err(|source| SweepError::Reading {
                step: step.label.clone(),
                source,
            })?;

        enter(SweepStage::Assembling)?;
        debug!(
            "Step '{}' produced {} rows x {} columns",
            step.label,
            table.row_count(),
            table.column_count()
        );
        Ok(StepResult {
            label: step.label.clone(),
            table,
        })
    }
}
