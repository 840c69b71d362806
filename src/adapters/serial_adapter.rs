//! Serial transport for RS-232/USB-serial source-measure units
//!
//! Wraps the serialport crate and runs the blocking port I/O on Tokio's
//! blocking executor.

use super::Transport;
use crate::error::{ConnectionError, TransportError, TransportResult};
use crate::instrument::session::{SessionConfig, TransportKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

/// Poll interval of the underlying port; the overall read deadline is the session timeout.
#[cfg(feature = "instrument_serial")]
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial transport for RS-232 communication
#[derive(Clone)]
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600, 57600)
    baud_rate: u32,

    /// Read timeout for a whole response line
    timeout: Duration,

    /// Line terminator appended to commands (e.g., "\r\n")
    write_terminator: String,

    /// Response line ending character (e.g., '\n')
    read_terminator: char,

    /// The actual serial port (behind Arc<Mutex> for blocking-task access)
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialTransport {
    /// Create an unopened transport from session settings.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            port_name: config.address.clone(),
            baud_rate: config.baud_rate,
            timeout: config.timeout,
            write_terminator: config.write_terminator.clone(),
            read_terminator: config.read_terminator,
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Open the port described by `config`.
    pub async fn open(config: &SessionConfig) -> Result<Self, ConnectionError> {
        let mut transport = Self::new(config);
        transport.connect().await?;
        Ok(transport)
    }

    /// Check if the port is open
    pub fn is_open(&self) -> bool {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.is_some()
        }
        #[cfg(not(feature = "instrument_serial"))]
        {
            false
        }
    }

    #[cfg(feature = "instrument_serial")]
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;

        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&port_name, baud_rate)
                .timeout(PORT_POLL_TIMEOUT)
                .open()
        })
        .await
        .map_err(|e| self.open_error(e.to_string()))?
        .map_err(|e| self.open_error(e.to_string()))?;

        self.port = Some(Arc::new(Mutex::new(port)));
        debug!(
            "Serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
        Ok(())
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        Err(ConnectionError::FeatureNotEnabled(
            "instrument_serial".to_string(),
        ))
    }

    #[cfg(feature = "instrument_serial")]
    fn open_error(&self, reason: String) -> ConnectionError {
        ConnectionError::Open {
            address: self.port_name.clone(),
            transport: TransportKind::Serial,
            reason,
        }
    }

    #[cfg(feature = "instrument_serial")]
    fn port(&self) -> TransportResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port.as_ref().map(Arc::clone).ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        "serial"
    }

    async fn write_line(&mut self, line: &str) -> TransportResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let framed = format!("{}{}", line, self.write_terminator);
            let command = line.to_string();
            let timeout = self.timeout;

            // Execute blocking serial I/O on dedicated thread
            tokio::task::spawn_blocking(move || {
                use std::io::Write;

                let mut port = port.blocking_lock();
                port.write_all(framed.as_bytes())
                    .and_then(|_| port.flush())
                    .map_err(|e| TransportError::from_io(&command, e, timeout))?;

                debug!("Sent serial line: {}", command);
                Ok(())
            })
            .await
            .map_err(|e| TransportError::Task(e.to_string()))?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = line;
            Err(TransportError::Closed)
        }
    }

    async fn query_line(&mut self, line: &str) -> TransportResult<String> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let framed = format!("{}{}", line, self.write_terminator);
            let command = line.to_string();
            let delimiter = self.read_terminator;
            let timeout = self.timeout;

            tokio::task::spawn_blocking(move || {
                use std::io::{Read, Write};

                let mut port = port.blocking_lock();
                port.write_all(framed.as_bytes())
                    .and_then(|_| port.flush())
                    .map_err(|e| TransportError::from_io(&command, e, timeout))?;

                debug!("Sent serial query: {}", command);

                // Read response byte-by-byte until delimiter
                let mut response = Vec::new();
                let mut byte = [0u8; 1];
                let start = std::time::Instant::now();

                loop {
                    if start.elapsed() > timeout {
                        return Err(TransportError::Timeout { command, timeout });
                    }

                    match port.read(&mut byte) {
                        Ok(1) => {
                            if byte[0] as char == delimiter {
                                break;
                            }
                            response.push(byte[0]);
                        }
                        Ok(_) => {
                            return Err(TransportError::Disconnected { command });
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                            // Port poll timeout is shorter than the response deadline
                            continue;
                        }
                        Err(e) => return Err(TransportError::from_io(&command, e, timeout)),
                    }
                }

                let response = String::from_utf8_lossy(&response).trim().to_string();
                debug!("Received serial response: {} bytes", response.len());
                Ok(response)
            })
            .await
            .map_err(|e| TransportError::Task(e.to_string()))?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = line;
            Err(TransportError::Closed)
        }
    }

    async fn close(&mut self) {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!("Serial port '{}' closed", self.port_name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            address: "/dev/ttyUSB0".to_string(),
            baud_rate: 57600,
            timeout: Duration::from_millis(500),
            write_terminator: "\n".to_string(),
            read_terminator: '\r',
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_serial_transport_creation() {
        let transport = SerialTransport::new(&config());
        assert_eq!(transport.name(), "serial");
        assert_eq!(transport.port_name, "/dev/ttyUSB0");
        assert_eq!(transport.baud_rate, 57600);
        assert_eq!(transport.timeout, Duration::from_millis(500));
        assert_eq!(transport.write_terminator, "\n");
        assert_eq!(transport.read_terminator, '\r');
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_write_before_open_is_closed_error() {
        let mut transport = SerialTransport::new(&config());
        let err = transport.write_line("loadscript").await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn test_close_unopened_port_is_noop() {
        let mut transport = SerialTransport::new(&config());
        transport.close().await;
        transport.close().await;
        assert!(!transport.is_open());
    }
}

#[cfg(all(test, unix, feature = "instrument_serial"))]
mod pty_tests {
    use super::*;
    use serialport::TTYPort;
    use std::io::{Read, Write};
    use std::thread;

    fn config(timeout: Duration) -> SessionConfig {
        SessionConfig {
            address: "pty".to_string(),
            timeout,
            write_terminator: "\r\n".to_string(),
            read_terminator: '\n',
            ..SessionConfig::default()
        }
    }

    /// Transport bound to one end of a pseudo-terminal pair; the other end plays the instrument.
    fn attached(timeout: Duration) -> (SerialTransport, TTYPort) {
        let (mut instrument, mut host) = TTYPort::pair().unwrap();
        host.set_timeout(Duration::from_millis(50)).unwrap();
        instrument.set_timeout(Duration::from_secs(2)).unwrap();

        let mut transport = SerialTransport::new(&config(timeout));
        let host: Box<dyn SerialPort> = Box::new(host);
        transport.port = Some(Arc::new(Mutex::new(host)));
        (transport, instrument)
    }

    fn read_exactly(port: &mut TTYPort, len: usize) -> String {
        let mut buf = vec![0u8; len];
        port.read_exact(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_line_appends_terminator() {
        let (mut transport, mut instrument) = attached(Duration::from_millis(500));
        let command = "printbuffer(1, smua.nvbuffer1.n, smua.nvbuffer1.readings)";

        transport.write_line(command).await.unwrap();

        let expected = format!("{command}\r\n");
        let received = thread::spawn(move || read_exactly(&mut instrument, expected.len()))
            .join()
            .unwrap();
        assert_eq!(received, format!("{command}\r\n"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_query_line_returns_trimmed_response() {
        let (mut transport, mut instrument) = attached(Duration::from_secs(2));
        let command = "printbuffer(1, smua.nvbuffer1.n, smua.nvbuffer1.readings)";
        let framed_len = command.len() + 2;

        let responder = thread::spawn(move || {
            let received = read_exactly(&mut instrument, framed_len);
            instrument.write_all(b"1.0,2.0\r\n").unwrap();
            instrument.flush().unwrap();
            // Keep the master end open; dropping it hangs up the host side
            (received, instrument)
        });

        let response = transport.query_line(command).await.unwrap();
        assert_eq!(response, "1.0,2.0");
        assert_eq!(responder.join().unwrap().0, format!("{command}\r\n"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_silent_peer_times_out() {
        let (mut transport, _instrument) = attached(Duration::from_millis(500));

        let err = transport.query_line("x").await.unwrap_err();
        match err {
            TransportError::Timeout { command, timeout } => {
                assert_eq!(command, "x");
                assert_eq!(timeout, Duration::from_millis(500));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The port stays usable after a missed deadline
        assert!(transport.is_open());
    }
}
