//! Tabular sweep results.

use super::MeasurementKind;
use crate::data::table::ColumnTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Table produced by one step of a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step label, e.g. "neg-pos-transfer"
    pub label: String,
    /// Columns in declared channel order
    pub table: ColumnTable,
}

/// Everything a finished sweep produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    /// Measurement that ran
    pub kind: MeasurementKind,
    /// Sample it ran on
    pub sample_id: String,
    /// One entry per step, in execution order
    pub steps: Vec<StepResult>,
    /// When the first step started loading
    pub started_at: DateTime<Utc>,
    /// When the last step was assembled
    pub finished_at: DateTime<Utc>,
}

impl SweepResult {
    /// Look up a step's table by label
    pub fn step(&self, label: &str) -> Option<&ColumnTable> {
        self.steps
            .iter()
            .find(|s| s.label == label)
            .map(|s| &s.table)
    }

    /// Wall-clock time between start of the first step and end of the last
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Total number of rows across steps
    pub fn total_rows(&self) -> usize {
        self.steps.iter().map(|s| s.table.row_count()).sum()
    }
}
