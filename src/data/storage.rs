//! Tab-separated result files with clean feature flag handling.
//!
//! Every step of a sweep becomes one file, `<output_dir>/<sample>-<label>.csv`,
//! holding a header row of column names followed by one row per sample.

use crate::measurement::SweepResult;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure while persisting a sweep
#[derive(Debug, Error)]
pub enum StorageError {
    /// The output directory could not be created.
    #[error("Failed to create output directory {path:?}: {source}")]
    CreateDir {
        /// Directory
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A result file could not be written.
    #[error("Failed to write {path:?}: {reason}")]
    Write {
        /// File being written
        path: PathBuf,
        /// Underlying error message
        reason: String,
    },

    /// Storage backend compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

/// Writes sweep results as tab-separated tables
#[derive(Debug, Clone)]
pub struct TsvWriter {
    output_dir: PathBuf,
}

impl TsvWriter {
    /// Writer into `output_dir`, created on first write
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Directory files are written to
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File that holds step `label` of `sample_id`
    pub fn path_for(&self, sample_id: &str, label: &str) -> PathBuf {
        self.output_dir.join(format!("{}-{}.csv", sample_id, label))
    }
}

// ============================================================================
// CSV-backed writer
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use crate::data::table::ColumnTable;
    use tracing::info;

    impl TsvWriter {
        /// Write every step of `result`, returning the files created in step order.
        pub fn write_result(&self, result: &SweepResult) -> Result<Vec<PathBuf>, StorageError> {
            if !self.output_dir.exists() {
                std::fs::create_dir_all(&self.output_dir).map_err(|source| {
                    StorageError::CreateDir {
                        path: self.output_dir.clone(),
                        source,
                    }
                })?;
            }

            let mut written = Vec::with_capacity(result.steps.len());
            for step in &result.steps {
                let path = self.path_for(&result.sample_id, &step.label);
                write_table(&path, &step.table).map_err(|e| StorageError::Write {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                info!(
                    "Wrote {} rows to '{}'",
                    step.table.row_count(),
                    path.display()
                );
                written.push(path);
            }
            Ok(written)
        }
    }

    fn write_table(path: &Path, table: &ColumnTable) -> Result<(), csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;

        writer.write_record(table.names())?;
        for row in table.rows() {
            writer.write_record(row.iter().map(|v| format!("{:e}", v)))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    impl TsvWriter {
        /// Always fails; the `storage_csv` feature is off.
        pub fn write_result(&self, _result: &SweepResult) -> Result<Vec<PathBuf>, StorageError> {
            Err(StorageError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }
}
