//! Mock transport for testing.
//!
//! Simulates an instrument on the other end of the wire without physical
//! hardware:
//! - scripted responses, sticky (`respond`) or one-shot (`respond_once`)
//! - raw block responses for binary transfers
//! - a write log for asserting command order
//! - controllable failure injection
//!
//! Handles are `Clone` with shared interior state, so a test can keep one
//! clone for inspection after boxing another into a session.

use super::{OpenError, ResourceSelector, Transport, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockInner {
    sticky: HashMap<String, String>,
    queued: HashMap<String, VecDeque<String>>,
    queued_raw: HashMap<String, VecDeque<Vec<u8>>>,
    writes: Vec<String>,
    last_write: Option<String>,
    failures_left: u32,
    closed: bool,
}

impl MockInner {
    fn take_failure(&mut self) -> bool {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            true
        } else {
            false
        }
    }

    fn text_response(&mut self, cmd: &str) -> Option<String> {
        if let Some(queue) = self.queued.get_mut(cmd) {
            if let Some(response) = queue.pop_front() {
                return Some(response);
            }
        }
        self.sticky.get(cmd).cloned()
    }

    fn raw_response(&mut self, cmd: &str) -> Option<Vec<u8>> {
        if let Some(queue) = self.queued_raw.get_mut(cmd) {
            if let Some(response) = queue.pop_front() {
                return Some(response);
            }
        }
        // Fall back to the text script so raw reads of text responses work.
        self.text_response(cmd).map(String::into_bytes)
    }
}

/// Scripted in-memory transport.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
    resource: String,
    simulated: bool,
    latency: Duration,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockInner::default())),
            resource: "MOCK0::INSTR".to_string(),
            simulated: true,
            latency: Duration::ZERO,
        }
    }

    /// Convenience: a transport that already answers `*IDN?` with `idn` and
    /// acknowledges `*OPC?`, enough for a session to identify.
    pub fn identified(idn: &str) -> Self {
        let mock = Self::new();
        mock.respond("*IDN?", idn);
        mock.respond("*OPC?", "1");
        mock
    }

    /// Treat the transport as real hardware: sessions will pace transactions.
    pub fn unsimulated(mut self) -> Self {
        self.simulated = false;
        self
    }

    /// Add a fixed per-operation latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Script a sticky response: returned every time `cmd` is queried.
    pub fn respond(&self, cmd: &str, response: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.sticky.insert(cmd.to_string(), response.to_string());
        }
    }

    /// Script a one-shot response, consumed before any sticky one.
    pub fn respond_once(&self, cmd: &str, response: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .queued
                .entry(cmd.to_string())
                .or_default()
                .push_back(response.to_string());
        }
    }

    /// Script a one-shot raw (binary) response.
    pub fn respond_raw_once(&self, cmd: &str, response: &[u8]) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .queued_raw
                .entry(cmd.to_string())
                .or_default()
                .push_back(response.to_vec());
        }
    }

    /// Fail the next `count` operations with an I/O error.
    pub fn inject_failures(&self, count: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures_left = count;
        }
    }

    /// Every line written so far, in order.
    pub fn writes(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.writes.clone())
            .unwrap_or_default()
    }

    pub fn clear_writes(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.writes.clear();
        }
    }

    async fn simulate_latency(&self) {
        if self.latency > Duration::ZERO {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.simulate_latency().await;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| TransportError::Io("mock state poisoned".into()))?;
        if inner.closed {
            return Err(TransportError::Closed);
        }
        if inner.take_failure() {
            return Err(TransportError::Io("injected failure".into()));
        }
        inner.writes.push(line.to_string());
        inner.last_write = Some(line.to_string());
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        self.simulate_latency().await;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| TransportError::Io("mock state poisoned".into()))?;
        if inner.closed {
            return Err(TransportError::Closed);
        }
        if inner.take_failure() {
            return Err(TransportError::Io("injected failure".into()));
        }
        let cmd = inner.last_write.take().ok_or(TransportError::Timeout)?;
        inner.text_response(&cmd).ok_or(TransportError::Timeout)
    }

    async fn read_raw(&mut self) -> Result<Vec<u8>, TransportError> {
        self.simulate_latency().await;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| TransportError::Io("mock state poisoned".into()))?;
        if inner.closed {
            return Err(TransportError::Closed);
        }
        if inner.take_failure() {
            return Err(TransportError::Io("injected failure".into()));
        }
        let cmd = inner.last_write.take().ok_or(TransportError::Timeout)?;
        inner.raw_response(&cmd).ok_or(TransportError::Timeout)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Ok(mut inner) = self.inner.lock() {
            inner.closed = true;
        }
        Ok(())
    }

    fn is_simulated(&self) -> bool {
        self.simulated
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

/// Opener handing out clones of one scripted transport, or scripted failures.
pub struct MockOpener {
    transport: Option<MockTransport>,
    refuse: bool,
}

impl MockOpener {
    /// Always matches; opens clones of `transport`.
    pub fn new(transport: MockTransport) -> Self {
        Self {
            transport: Some(transport),
            refuse: false,
        }
    }

    /// Matches nothing: every open fails with [`OpenError::NotFound`].
    pub fn empty() -> Self {
        Self {
            transport: None,
            refuse: false,
        }
    }

    /// Matches but refuses to open: every open fails with [`OpenError::Open`].
    pub fn refusing() -> Self {
        Self {
            transport: None,
            refuse: true,
        }
    }
}

#[async_trait]
impl super::TransportOpener for MockOpener {
    async fn open(
        &self,
        selector: &ResourceSelector,
    ) -> Result<Box<dyn Transport>, OpenError> {
        if self.refuse {
            return Err(OpenError::Open {
                resource: selector.fragment(),
                reason: "refused by mock".into(),
            });
        }
        match &self.transport {
            Some(transport) => Ok(Box::new(transport.clone())),
            None => Err(OpenError::NotFound(selector.to_string())),
        }
    }
}
