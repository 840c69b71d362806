//! Line-oriented transports to the instrument.
//!
//! A [`Transport`] owns the physical link and frames commands as lines. The
//! session layer decides which transport to open from an explicit
//! [`TransportKind`](crate::instrument::session::TransportKind) tag.

use crate::error::TransportResult;
use async_trait::async_trait;

pub mod mock_adapter;
pub mod serial_adapter;

pub use mock_adapter::MockTransport;
pub use serial_adapter::SerialTransport;

/// Generic async transport for line-oriented instruments
#[async_trait]
pub trait Transport: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Send one line. The transport appends its write terminator and flushes.
    async fn write_line(&mut self, line: &str) -> TransportResult<()>;

    /// Send one line and read one terminated response line.
    async fn query_line(&mut self, line: &str) -> TransportResult<String>;

    /// Release the link. Must be safe to call more than once.
    async fn close(&mut self);
}
