//! Instrument session: one transport plus the state machine around it.
//!
//! Construction and connection are separate steps. [`Session::new`] only records
//! the configuration, and [`Session::connect`] opens the link and reports a typed
//! [`ConnectionError`] the caller can retry on. Once connected, every command goes
//! through [`Session::write`] or [`Session::query`], which are flushed in call
//! order. The first transport failure moves the session to
//! [`SessionState::Error`], and from then on the session refuses to touch the
//! link until it is reconnected.
//!
//! ```text
//! Disconnected → Connecting → Connected ⇄ Busy
//!                    │            │        │
//!                    └──────→ Error ←──────┘
//! ```

use crate::adapters::{MockTransport, SerialTransport, Transport};
use crate::error::{ConnectionError, TransportError, TransportResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identification query sent when `identify` is enabled.
pub const IDENTIFY_QUERY: &str = "*IDN?";

/// Physical link selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// RS-232 or USB-serial adapter
    #[default]
    Serial,
    /// GPIB bus, recognised but not supported
    Gpib,
    /// In-process simulated instrument
    Mock,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Serial => "serial",
            TransportKind::Gpib => "gpib",
            TransportKind::Mock => "mock",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No transport open
    Disconnected,
    /// Transport being opened
    Connecting,
    /// Idle and ready for a sweep
    Connected,
    /// A sweep owns the session
    Busy,
    /// A transport failure made the session unusable
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Connection parameters for a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Port path or resource address (e.g., "/dev/ttyUSB0")
    pub address: String,
    /// Which transport to open
    pub transport: TransportKind,
    /// Appended to every command line
    pub write_terminator: String,
    /// Ends every response line
    pub read_terminator: char,
    /// Baud rate for serial links
    pub baud_rate: u32,
    /// Deadline for a single response line
    pub timeout: Duration,
    /// Perform one `*IDN?` exchange during connect
    pub identify: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: "/dev/ttyUSB0".to_string(),
            transport: TransportKind::Serial,
            write_terminator: "\r\n".to_string(),
            read_terminator: '\n',
            baud_rate: 57600,
            timeout: Duration::from_secs(10),
            identify: false,
        }
    }
}

/// A link to one instrument
pub struct Session {
    config: SessionConfig,
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    identity: Option<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.config.address)
            .field("transport", &self.transport.as_ref().map(|t| t.name()))
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    /// Create a disconnected session. No I/O happens until [`Session::connect`].
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            transport: None,
            state: SessionState::Disconnected,
            identity: None,
        }
    }

    /// Create and connect in one step.
    pub async fn open(config: SessionConfig) -> Result<Self, ConnectionError> {
        let mut session = Self::new(config);
        session.connect().await?;
        Ok(session)
    }

    /// Build a connected session over an already-open transport.
    pub fn with_transport(config: SessionConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            config,
            transport: Some(transport),
            state: SessionState::Connected,
            identity: None,
        }
    }

    /// Open the configured transport.
    ///
    /// Any failure during setup, including the optional identification
    /// exchange, leaves the session in [`SessionState::Error`]. Calling
    /// `connect` again retries from scratch.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if matches!(self.state, SessionState::Connected | SessionState::Busy) {
            return Ok(());
        }

        self.close().await;
        self.state = SessionState::Connecting;
        info!(
            "Connecting to instrument at '{}' via {}",
            self.config.address, self.config.transport
        );

        match self.open_transport().await {
            Ok(()) => {
                self.state = SessionState::Connected;
                info!("Instrument session at '{}' connected", self.config.address);
                Ok(())
            }
            Err(e) => {
                warn!("Connection to '{}' failed: {}", self.config.address, e);
                self.transport = None;
                self.state = SessionState::Error;
                Err(e)
            }
        }
    }

    async fn open_transport(&mut self) -> Result<(), ConnectionError> {
        let mut transport: Box<dyn Transport> = match self.config.transport {
            TransportKind::Serial => Box::new(SerialTransport::open(&self.config).await?),
            TransportKind::Mock => Box::new(MockTransport::ofet_demo(21)),
            TransportKind::Gpib => return Err(ConnectionError::Unsupported(TransportKind::Gpib)),
        };

        if self.config.identify {
            match transport.query_line(IDENTIFY_QUERY).await {
                Ok(idn) => {
                    info!("Instrument identified as: {}", idn);
                    self.identity = Some(idn);
                }
                Err(source) => {
                    transport.close().await;
                    return Err(ConnectionError::Identify {
                        address: self.config.address.clone(),
                        source,
                    });
                }
            }
        }

        self.transport = Some(transport);
        Ok(())
    }

    /// Release the link. Closing a closed or never-opened session is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
            info!("Instrument session at '{}' closed", self.config.address);
        }
        self.state = SessionState::Disconnected;
    }

    /// Send one command line.
    pub async fn write(&mut self, line: &str) -> TransportResult<()> {
        let result = match self.usable_transport() {
            Ok(transport) => transport.write_line(line).await,
            Err(e) => return Err(e),
        };
        self.track(result)
    }

    /// Send one command line and return the trimmed response.
    pub async fn query(&mut self, line: &str) -> TransportResult<String> {
        let result = match self.usable_transport() {
            Ok(transport) => transport.query_line(line).await,
            Err(e) => return Err(e),
        };
        self.track(result)
    }

    fn usable_transport(&mut self) -> TransportResult<&mut Box<dyn Transport>> {
        match self.state {
            SessionState::Error => return Err(TransportError::SessionUnusable),
            SessionState::Disconnected => return Err(TransportError::Closed),
            _ => {}
        }
        self.transport.as_mut().ok_or(TransportError::Closed)
    }

    fn track<T>(&mut self, result: TransportResult<T>) -> TransportResult<T> {
        if let Err(e) = &result {
            warn!("Transport failure on '{}': {}", self.config.address, e);
            self.state = SessionState::Error;
        }
        result
    }

    /// Fail unless the session can start a sweep.
    pub fn ensure_ready(&self) -> Result<(), ConnectionError> {
        match self.state {
            SessionState::Connected => Ok(()),
            other => Err(ConnectionError::NotConnected(other)),
        }
    }

    /// Mark the session busy for the duration of a sweep.
    pub(crate) fn begin_sweep(&mut self) {
        if self.state == SessionState::Connected {
            self.state = SessionState::Busy;
        }
    }

    /// Return to `Connected` after a sweep unless a transport error occurred.
    pub(crate) fn end_sweep(&mut self) {
        if self.state == SessionState::Busy {
            self.state = SessionState::Connected;
        }
        debug!("Session state after sweep: {}", self.state);
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connection parameters
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Response to the identification query, if one was made
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }
}
