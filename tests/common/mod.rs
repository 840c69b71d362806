//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::Path;
use tempfile::TempDir;
use tsp_daq::adapters::MockTransport;
use tsp_daq::instrument::{Session, SessionConfig};
use tsp_daq::measurement::{MeasurementKind, ScriptCatalog, SweepRunner};

pub const SCRIPTS: [&str; 5] = [
    "iv-sweep.tsp",
    "output-charact.tsp",
    "transfer-charact.tsp",
    "transfer-charact-2.tsp",
    "inverter.tsp",
];

/// Body written for every script: a marker line naming the file, then two commands.
pub fn script_lines(name: &str) -> Vec<String> {
    vec![
        format!("-- {}", name),
        "smua.reset()".to_string(),
        "smua.nvbuffer1.clear()".to_string(),
    ]
}

/// Directory holding every catalogue script
pub fn script_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in SCRIPTS {
        write_script(dir.path(), name);
    }
    dir
}

fn write_script(dir: &Path, name: &str) {
    let body = script_lines(name).join("\n");
    std::fs::write(dir.join(name), body + "\n").unwrap();
}

pub fn runner(dir: &TempDir) -> SweepRunner {
    SweepRunner::new(ScriptCatalog::new(dir.path()))
}

pub fn session(mock: &MockTransport) -> Session {
    Session::with_transport(SessionConfig::default(), Box::new(mock.clone()))
}

/// Every line a successful sweep of `kind` puts on the wire, in order
pub fn expected_wire(runner: &SweepRunner, kind: MeasurementKind) -> Vec<String> {
    let mut wire = Vec::new();
    for step in runner.catalog().steps(kind) {
        wire.push("loadscript".to_string());
        wire.extend(script_lines(&step.descriptor.name));
        wire.push("endscript".to_string());
        wire.push("script.anonymous.run()".to_string());
        wire.extend(step.descriptor.channels.iter().map(|c| c.query()));
    }
    wire
}
