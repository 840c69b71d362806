//! Measurement kinds and the script catalogue that implements them.
//!
//! Each [`MeasurementKind`] is a fixed sequence of steps. A step uploads one
//! script, runs it, and reads a fixed set of buffer columns back. The
//! catalogue maps kinds to script files under a configurable directory.

pub mod result;
pub mod sweep;

pub use result::{StepResult, SweepResult};
pub use sweep::{CancelToken, SweepProgress, SweepRequest, SweepRunner, SweepStage};

use crate::instrument::buffer::{BufferChannel, BufferField, Smu};
use crate::instrument::script::ScriptDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// A measurement the instrument can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeasurementKind {
    /// Channel I-V sweep on SMU A
    IvSweep,
    /// OFET output characteristic
    Output,
    /// OFET transfer characteristic, forward then reverse
    Transfer,
    /// Inverter transfer curve
    Inverter,
}

impl MeasurementKind {
    /// Every kind, in catalogue order
    pub const ALL: [MeasurementKind; 4] = [
        MeasurementKind::IvSweep,
        MeasurementKind::Output,
        MeasurementKind::Transfer,
        MeasurementKind::Inverter,
    ];

    /// The full OFET characterisation run in one go
    pub const OFET_SEQUENCE: [MeasurementKind; 3] = [
        MeasurementKind::IvSweep,
        MeasurementKind::Output,
        MeasurementKind::Transfer,
    ];

    fn step_specs(self) -> &'static [StepSpec] {
        match self {
            MeasurementKind::IvSweep => &IV_STEPS,
            MeasurementKind::Output => &OUTPUT_STEPS,
            MeasurementKind::Transfer => &TRANSFER_STEPS,
            MeasurementKind::Inverter => &INVERTER_STEPS,
        }
    }

    /// Labels of the steps this kind runs, in order
    pub fn step_labels(self) -> Vec<&'static str> {
        self.step_specs().iter().map(|s| s.label).collect()
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeasurementKind::IvSweep => "iv-sweep",
            MeasurementKind::Output => "output",
            MeasurementKind::Transfer => "transfer",
            MeasurementKind::Inverter => "inverter",
        };
        f.write_str(name)
    }
}

/// Unrecognised measurement name
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown measurement '{0}'. Expected one of: iv, output, transfer, inverter")]
pub struct UnknownMeasurement(pub String);

impl FromStr for MeasurementKind {
    type Err = UnknownMeasurement;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "iv" | "iv-sweep" => Ok(MeasurementKind::IvSweep),
            "output" => Ok(MeasurementKind::Output),
            "transfer" => Ok(MeasurementKind::Transfer),
            "inverter" => Ok(MeasurementKind::Inverter),
            _ => Err(UnknownMeasurement(s.to_string())),
        }
    }
}

struct StepSpec {
    label: &'static str,
    script: &'static str,
    channels: &'static [BufferChannel],
}

static IV_CHANNELS: [BufferChannel; 2] = [
    BufferChannel::new("Channel Voltage [V]", Smu::A, BufferField::SourceValues),
    BufferChannel::new("Channel Current [A]", Smu::A, BufferField::Readings),
];

static OFET_CHANNELS: [BufferChannel; 4] = [
    BufferChannel::new("Gate Voltage [V]", Smu::B, BufferField::SourceValues),
    BufferChannel::new("Channel Voltage [V]", Smu::A, BufferField::SourceValues),
    BufferChannel::new("Channel Current [A]", Smu::A, BufferField::Readings),
    BufferChannel::new("Gate Leakage [A]", Smu::B, BufferField::Readings),
];

static INVERTER_CHANNELS: [BufferChannel; 3] = [
    BufferChannel::new("Voltage In [V]", Smu::A, BufferField::SourceValues),
    BufferChannel::new("Voltage Out [V]", Smu::B, BufferField::Readings),
    BufferChannel::new("Leakage Current [A]", Smu::A, BufferField::Readings),
];

static IV_STEPS: [StepSpec; 1] = [StepSpec {
    label: "iv-sweep",
    script: "iv-sweep.tsp",
    channels: &IV_CHANNELS,
}];

static OUTPUT_STEPS: [StepSpec; 1] = [StepSpec {
    label: "output",
    script: "output-charact.tsp",
    channels: &OFET_CHANNELS,
}];

static TRANSFER_STEPS: [StepSpec; 2] = [
    StepSpec {
        label: "neg-pos-transfer",
        script: "transfer-charact.tsp",
        channels: &OFET_CHANNELS,
    },
    StepSpec {
        label: "pos-neg-transfer",
        script: "transfer-charact-2.tsp",
        channels: &OFET_CHANNELS,
    },
];

static INVERTER_STEPS: [StepSpec; 1] = [StepSpec {
    label: "inverter",
    script: "inverter.tsp",
    channels: &INVERTER_CHANNELS,
}];

/// One load/run/read cycle of a measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepStep {
    /// Label attached to this step's table
    pub label: String,
    /// Script and columns for this step
    pub descriptor: ScriptDescriptor,
}

impl SweepStep {
    /// Create a step
    pub fn new(label: impl Into<String>, descriptor: ScriptDescriptor) -> Self {
        Self {
            label: label.into(),
            descriptor,
        }
    }
}

/// Resolves measurement kinds to concrete steps.
///
/// By default every kind reads its scripts from `directory`. Individual kinds
/// can be replaced with custom steps, which is how tests run without script
/// files.
#[derive(Debug, Clone)]
pub struct ScriptCatalog {
    directory: PathBuf,
    overrides: HashMap<MeasurementKind, Vec<SweepStep>>,
}

impl Default for ScriptCatalog {
    fn default() -> Self {
        Self::new("TSP-scripts")
    }
}

impl ScriptCatalog {
    /// Catalogue reading scripts from `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            overrides: HashMap::new(),
        }
    }

    /// Replace the steps of `kind`
    pub fn with_steps(mut self, kind: MeasurementKind, steps: Vec<SweepStep>) -> Self {
        self.overrides.insert(kind, steps);
        self
    }

    /// Script directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Steps of `kind` in execution order
    pub fn steps(&self, kind: MeasurementKind) -> Vec<SweepStep> {
        if let Some(steps) = self.overrides.get(&kind) {
            return steps.clone();
        }

        kind.step_specs()
            .iter()
            .map(|spec| {
                SweepStep::new(
                    spec.label,
                    ScriptDescriptor::from_file(
                        self.directory.join(spec.script),
                        spec.channels.to_vec(),
                    ),
                )
            })
            .collect()
    }
}
