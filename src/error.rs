//! Error types for instrument sessions and sweeps.
//!
//! Every stage of a sweep has its own error type so a caller can tell where a
//! measurement went wrong, since recovery differs by stage:
//!
//! - **`ConnectionError`**: the transport could not be opened or the instrument did
//!   not identify itself. Fatal to the session; a fresh `connect` is required.
//! - **`TransportError`**: an I/O failure in the middle of a command. The session is
//!   considered unusable afterwards and is never reconnected automatically.
//! - **`ScriptUploadError`**: the script source was missing, or the link failed while
//!   lines were being uploaded. The instrument's script store is indeterminate until
//!   the next successful upload.
//! - **`BufferParseError`**: a buffer dump was malformed, mismatched or empty. The
//!   whole readback is discarded.
//! - **`CancelledError`**: cooperative cancellation honoured at a stage boundary.
//!
//! `SweepError` wraps the first failure of a sweep together with the stage it
//! happened in. Nothing in this crate retries on error.

use crate::instrument::session::{SessionState, TransportKind};
use crate::measurement::sweep::SweepStage;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for transport-level results.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Failure to establish a session with the instrument.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The transport refused to open.
    #[error("Failed to open {transport} transport at '{address}': {reason}")]
    Open {
        /// Address the session was configured with
        address: String,
        /// Transport that was attempted
        transport: TransportKind,
        /// Underlying driver message
        reason: String,
    },

    /// The port opened but `*IDN?` went unanswered.
    #[error("Instrument at '{address}' did not answer the identification query: {source}")]
    Identify {
        /// Address the session was configured with
        address: String,
        /// Failure of the identification query
        #[source]
        source: TransportError,
    },

    /// Transport kind without a driver in this crate.
    #[error("Transport '{0}' is not supported, use a serial connection")]
    Unsupported(TransportKind),

    /// Transport driver compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// A sweep was attempted on a session that is not `Connected`.
    #[error("Session is not ready for a sweep (state: {0})")]
    NotConnected(SessionState),
}

/// I/O failure while talking to a connected instrument.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No complete response line arrived within the session timeout.
    #[error("Timed out after {timeout:?} waiting for a response to '{command}'")]
    Timeout {
        /// Command that went unanswered
        command: String,
        /// Deadline that expired
        timeout: Duration,
    },

    /// The peer went away mid-command.
    #[error("Instrument disconnected during '{command}'")]
    Disconnected {
        /// Command in flight
        command: String,
    },

    /// Any other I/O failure.
    #[error("I/O error during '{command}': {source}")]
    Io {
        /// Command in flight
        command: String,
        /// Raw I/O error
        #[source]
        source: std::io::Error,
    },

    /// The session already failed and refuses further traffic.
    #[error("Session is unusable after an earlier transport failure")]
    SessionUnusable,

    /// The transport was never opened or has been closed.
    #[error("Session is closed")]
    Closed,

    /// The blocking I/O task panicked or was cancelled.
    #[error("Serial I/O task failed: {0}")]
    Task(String),
}

impl TransportError {
    /// Classify an I/O error raised while sending `command`.
    pub fn from_io(command: &str, err: std::io::Error, timeout: Duration) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout {
                command: command.to_string(),
                timeout,
            },
            ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::UnexpectedEof => Self::Disconnected {
                command: command.to_string(),
            },
            _ => Self::Io {
                command: command.to_string(),
                source: err,
            },
        }
    }
}

/// Why a script upload failed.
#[derive(Error, Debug)]
pub enum UploadFailure {
    /// Raised before anything is sent to the instrument.
    #[error("script source missing: {0}")]
    SourceMissing(String),

    /// Raised mid-upload; the instrument's script store is indeterminate.
    #[error("transport failure: {0}")]
    TransportFailure(#[source] TransportError),
}

/// Failure while uploading an anonymous script.
#[derive(Error, Debug)]
#[error("Failed to upload script '{script}': {reason}")]
pub struct ScriptUploadError {
    /// Script name as shown in logs
    pub script: String,
    /// What went wrong
    #[source]
    pub reason: UploadFailure,
}

impl ScriptUploadError {
    pub(crate) fn source_missing(script: &str, detail: impl Into<String>) -> Self {
        Self {
            script: script.to_string(),
            reason: UploadFailure::SourceMissing(detail.into()),
        }
    }

    pub(crate) fn transport(script: &str, err: TransportError) -> Self {
        Self {
            script: script.to_string(),
            reason: UploadFailure::TransportFailure(err),
        }
    }

    /// True if the upload never started because the source could not be resolved.
    pub fn is_source_missing(&self) -> bool {
        matches!(self.reason, UploadFailure::SourceMissing(_))
    }
}

/// Buffer payload rejected during readback.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferParseError {
    /// A token was not a finite number.
    #[error("Malformed value '{token}' in channel '{channel}'")]
    Malformed {
        /// Channel the token came from
        channel: String,
        /// Offending token, trimmed
        token: String,
    },

    /// A channel's length differs from the first channel's.
    #[error("Channel '{channel}' returned {found} values, expected {expected}")]
    LengthMismatch {
        /// First channel that disagreed
        channel: String,
        /// Length of the first channel
        expected: usize,
        /// Length of the disagreeing channel
        found: usize,
    },

    /// All channels were empty and empty reads were not allowed.
    #[error("Every buffer channel was empty")]
    Empty,
}

/// Failure while reading buffers back from the instrument.
#[derive(Error, Debug)]
pub enum BufferError {
    /// A dump query failed on the wire.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A dump arrived but was rejected.
    #[error(transparent)]
    Parse(#[from] BufferParseError),
}

/// A buffer channel given as text could not be understood.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelSpecError {
    /// The text lacked the `unit:field` shape.
    #[error("Channel '{0}' must look like 'smua:readings' or 'Label=smub:sourcevalues'")]
    Format(String),

    /// Unknown SMU unit.
    #[error("Unknown SMU '{0}', expected smua or smub")]
    Smu(String),

    /// Unknown buffer attribute.
    #[error("Unknown buffer field '{0}', expected sourcevalues or readings")]
    Field(String),
}

/// Cooperative cancellation of a sweep.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError {
    /// Stage that would have started next, `None` if the sweep never left the queue.
    pub stage: Option<SweepStage>,
}

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "Sweep cancelled before {}", stage),
            None => write!(f, "Sweep cancelled while queued"),
        }
    }
}

/// First failure of a sweep, tagged with the stage it happened in.
#[derive(Error, Debug)]
pub enum SweepError {
    /// The session was not usable when the sweep started.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Script upload failed.
    #[error("Loading failed in step '{step}': {source}")]
    Loading {
        /// Step label
        step: String,
        /// Upload failure
        #[source]
        source: ScriptUploadError,
    },

    /// The run command failed.
    #[error("Running failed in step '{step}': {source}")]
    Running {
        /// Step label
        step: String,
        /// Transport failure
        #[source]
        source: TransportError,
    },

    /// Buffer readback failed.
    #[error("Reading failed in step '{step}': {source}")]
    Reading {
        /// Step label
        step: String,
        /// Readback failure
        #[source]
        source: BufferError,
    },

    /// Cancelled at a stage boundary.
    #[error(transparent)]
    Cancelled(#[from] CancelledError),
}

impl SweepError {
    /// Stage in which the sweep failed. `None` for connection failures and for
    /// cancellations that happened while the task was still queued.
    pub fn stage(&self) -> Option<SweepStage> {
        match self {
            SweepError::Connection(_) => None,
            SweepError::Loading { .. } => Some(SweepStage::Loading),
            SweepError::Running { .. } => Some(SweepStage::Running),
            SweepError::Reading { .. } => Some(SweepStage::Reading),
            SweepError::Cancelled(c) => c.stage,
        }
    }

    /// True if the sweep ended through cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SweepError::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BufferParseError::LengthMismatch {
            channel: "Gate Leakage [A]".to_string(),
            expected: 3,
            found: 2,
        };
        assert_eq!(
            err.to_string(),
            "Channel 'Gate Leakage [A]' returned 2 values, expected 3"
        );
    }

    #[test]
    fn test_sweep_error_reports_stage() {
        let err = SweepError::Running {
            step: "iv-sweep".into(),
            source: TransportError::Disconnected {
                command: "script.anonymous.run()".into(),
            },
        };
        assert_eq!(err.stage(), Some(SweepStage::Running));
        assert!(err.to_string().contains("Running failed in step 'iv-sweep'"));

        let err = SweepError::from(ConnectionError::NotConnected(SessionState::Error));
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn test_cancelled_display() {
        let queued = CancelledError { stage: None };
        assert_eq!(queued.to_string(), "Sweep cancelled while queued");

        let running = CancelledError {
            stage: Some(SweepStage::Reading),
        };
        assert_eq!(running.to_string(), "Sweep cancelled before Reading");
        assert!(SweepError::from(running).is_cancelled());
    }

    #[test]
    fn test_io_error_classification() {
        let timeout = Duration::from_secs(1);
        let err = TransportError::from_io(
            "loadscript",
            std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"),
            timeout,
        );
        assert!(matches!(err, TransportError::Timeout { .. }));

        let err = TransportError::from_io(
            "loadscript",
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"),
            timeout,
        );
        assert!(matches!(err, TransportError::Disconnected { .. }));
    }
}
