//! Mock transport for testing
//!
//! Simulates an instrument link without hardware. It provides:
//! - Scripted responses keyed by the exact query line
//! - Controllable failure injection
//! - A shared call log for verifying wire order

use super::Transport;
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    responses: HashMap<String, String>,
    call_log: Vec<String>,
    fail_on: Vec<String>,
}

/// Mock transport for testing
///
/// Clones share state, so a test can keep one handle for inspection while the
/// session owns another.
///
/// # Example
///
/// ```
/// use tsp_daq::adapters::MockTransport;
///
/// let mock = MockTransport::new()
///     .with_response("printbuffer(1, smua.nvbuffer1.n, smua.nvbuffer1.readings)", "1e-6,2e-6");
/// assert!(mock.call_log().is_empty());
/// ```
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    latency: Duration,
    should_fail_next: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a new mock transport with no responses and no latency
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            latency: Duration::ZERO,
            should_fail_next: Arc::new(AtomicBool::new(false)),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mock that answers every buffer dump of a four-channel OFET sweep with
    /// `points` samples, for running the binary without hardware.
    pub fn ofet_demo(points: usize) -> Self {
        let steps = points.max(2);
        let ramp = |scale: f64, offset: f64| -> String {
            (0..steps)
                .map(|i| {
                    let x = i as f64 / (steps - 1) as f64;
                    format!("{:e}", offset + scale * x)
                })
                .collect::<Vec<_>>()
                .join(",")
        };

        let mut mock = Self::new();
        for smu in ["smua", "smub"] {
            mock = mock
                .with_response(
                    &format!("printbuffer(1, {smu}.nvbuffer1.n, {smu}.nvbuffer1.sourcevalues)"),
                    &ramp(-40.0, 20.0),
                )
                .with_response(
                    &format!("printbuffer(1, {smu}.nvbuffer1.n, {smu}.nvbuffer1.readings)"),
                    &ramp(-1.0e-6, 0.0),
                );
        }
        mock
    }

    /// Answer `query` with `payload` every time it is asked
    pub fn with_response(self, query: &str, payload: &str) -> Self {
        self.lock()
            .responses
            .insert(query.to_string(), payload.to_string());
        self
    }

    /// Set simulated per-command latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every command whose line starts with `prefix`
    pub fn fail_on(&self, prefix: &str) {
        self.lock().fail_on.push(prefix.to_string());
    }

    /// Inject a failure for the next operation
    pub fn inject_next_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Every line sent so far, writes and queries alike, in wire order
    pub fn call_log(&self) -> Vec<String> {
        self.lock().call_log.clone()
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        self.lock().call_log.clear();
    }

    /// False once `close` has been called on any clone
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn transmit(&self, line: &str) -> TransportResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let mut state = self.lock();
        state.call_log.push(line.to_string());

        let injected = self.should_fail_next.swap(false, Ordering::SeqCst);
        if injected || state.fail_on.iter().any(|p| line.starts_with(p.as_str())) {
            return Err(TransportError::Disconnected {
                command: line.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn write_line(&mut self, line: &str) -> TransportResult<()> {
        self.transmit(line).await
    }

    async fn query_line(&mut self, line: &str) -> TransportResult<String> {
        self.transmit(line).await?;
        self.lock()
            .responses
            .get(line)
            .cloned()
            .ok_or_else(|| TransportError::Timeout {
                command: line.to_string(),
                timeout: self.latency,
            })
    }

    async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
