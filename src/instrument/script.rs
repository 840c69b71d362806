//! Anonymous script upload and execution.
//!
//! A script is uploaded by framing its lines between `loadscript` and
//! `endscript`, which replaces the instrument's anonymous script, and is
//! started with `script.anonymous.run()`.

use crate::error::{ScriptUploadError, TransportError};
use crate::instrument::buffer::BufferChannel;
use crate::instrument::session::Session;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Opens an anonymous script upload
pub const LOAD_SCRIPT: &str = "loadscript";
/// Closes an anonymous script upload
pub const END_SCRIPT: &str = "endscript";
/// Starts the anonymous script
pub const RUN_ANONYMOUS: &str = "script.anonymous.run()";

/// Where a script's lines come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptSource {
    /// A file read when the upload starts
    File(PathBuf),
    /// Lines held in memory
    Inline(Vec<String>),
}

/// A script to upload together with the buffer columns it produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDescriptor {
    /// Script name used in logs and errors
    pub name: String,
    /// Source of the script text
    pub source: ScriptSource,
    /// Columns to read back after the script has run, in wire order
    pub channels: Vec<BufferChannel>,
}

impl ScriptDescriptor {
    /// Script read from `path`, named after its file name
    pub fn from_file(path: impl Into<PathBuf>, channels: Vec<BufferChannel>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            source: ScriptSource::File(path),
            channels,
        }
    }

    /// Script built from in-memory lines
    pub fn inline(
        name: impl Into<String>,
        lines: impl IntoIterator<Item = impl Into<String>>,
        channels: Vec<BufferChannel>,
    ) -> Self {
        Self {
            name: name.into(),
            source: ScriptSource::Inline(lines.into_iter().map(Into::into).collect()),
            channels,
        }
    }

    /// Resolve the source to the lines that will be sent.
    ///
    /// Line content is kept as-is, only the line breaks are dropped.
    pub async fn resolve(&self) -> Result<Vec<String>, ScriptUploadError> {
        let lines: Vec<String> = match &self.source {
            ScriptSource::File(path) => {
                let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                    ScriptUploadError::source_missing(
                        &self.name,
                        format!("{}: {}", path.display(), e),
                    )
                })?;
                text.lines().map(str::to_string).collect()
            }
            ScriptSource::Inline(lines) => lines.clone(),
        };

        if lines.is_empty() {
            return Err(ScriptUploadError::source_missing(
                &self.name,
                "script has no lines",
            ));
        }
        Ok(lines)
    }
}

/// Upload `descriptor` as the instrument's anonymous script.
///
/// The source is resolved before anything is written, so a missing file never
/// reaches the instrument. On success exactly `lines + 2` writes were made.
pub async fn load_script(
    session: &mut Session,
    descriptor: &ScriptDescriptor,
) -> Result<(), ScriptUploadError> {
    let lines = descriptor.resolve().await?;
    let upload = |e: TransportError| ScriptUploadError::transport(&descriptor.name, e);

    debug!(
        "Uploading script '{}' ({} lines)",
        descriptor.name,
        lines.len()
    );
    session.write(LOAD_SCRIPT).await.map_err(upload)?;
    for line in &lines {
        session.write(line).await.map_err(upload)?;
    }
    session.write(END_SCRIPT).await.map_err(upload)?;

    info!("Loaded script '{}'", descriptor.name);
    Ok(())
}

/// Start the anonymous script. Returns as soon as the command is sent.
pub async fn run_script(session: &mut Session) -> Result<(), TransportError> {
    session.write(RUN_ANONYMOUS).await
}
