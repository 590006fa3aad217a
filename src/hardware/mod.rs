//! Transport seam between the protocol session and real hardware.
//!
//! A [`Transport`] is one opened instrument resource: line-oriented write and
//! read plus a raw binary read for block transfers. A [`TransportOpener`]
//! turns a [`ResourceSelector`] into an opened transport; the VISA-backed
//! implementation lives behind the `instrument_visa` feature and the mock
//! lives in [`mock`] for tests and simulation.
//!
//! The protocol is half-duplex: a transport is owned by exactly one session
//! and never carries two in-flight transactions. A stuck call is not
//! interruptible at this layer -- implementations must be timeout-bound
//! themselves.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod mock;

#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use mock::{MockOpener, MockTransport};

/// Errors surfaced by an opened transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(String),

    #[error("timed out waiting for response")]
    Timeout,

    #[error("transport is closed")]
    Closed,
}

/// Errors surfaced while opening a resource.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("no resource matches {0}")]
    NotFound(String),

    #[error("{resource} did not open: {reason}")]
    Open { resource: String, reason: String },
}

/// Identifies the instrument to open: USB vendor/product ids, optionally
/// narrowed by serial number, with an optional TCP/IP address fallback for
/// instruments not visible on the USB resource list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSelector {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: Option<String>,
    pub address: Option<String>,
}

impl ResourceSelector {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            serial: None,
            address: None,
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Fragment matched against resource strings, `0xVVVV::0xPPPP[::SERIAL]`.
    /// Serial numbers compare uppercased, as resource lists report them.
    pub fn fragment(&self) -> String {
        let mut fragment = format!("0x{:04X}::0x{:04X}", self.vendor_id, self.product_id);
        if let Some(serial) = &self.serial {
            fragment.push_str("::");
            fragment.push_str(&serial.to_uppercase());
        }
        fragment
    }
}

impl fmt::Display for ResourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fragment())?;
        if let Some(address) = &self.address {
            write!(f, " (TCPIP {})", address)?;
        }
        Ok(())
    }
}

/// One opened instrument resource.
#[async_trait]
pub trait Transport: Send {
    /// Send one newline-terminated command line.
    async fn write_line(&mut self, line: &str) -> std::result::Result<(), TransportError>;

    /// Read one response line, terminator stripped.
    async fn read_line(&mut self) -> std::result::Result<String, TransportError>;

    /// Read one response as raw bytes (block transfers keep their framing).
    async fn read_raw(&mut self) -> std::result::Result<Vec<u8>, TransportError>;

    /// Re-open the underlying resource after an instrument reset.
    async fn reopen(&mut self) -> std::result::Result<(), TransportError> {
        Ok(())
    }

    /// Release the resource. Further operations fail with [`TransportError::Closed`].
    async fn close(&mut self) -> std::result::Result<(), TransportError>;

    /// True for simulated backends; sessions skip transaction pacing on them.
    fn is_simulated(&self) -> bool {
        false
    }

    /// Resource string this transport was opened from.
    fn resource(&self) -> &str;
}

/// Opens transports from resource selectors. The out-of-scope catalog layer
/// provides one of these; the crate ships [`mock::MockOpener`] and, behind
/// `instrument_visa`, [`visa::VisaOpener`].
#[async_trait]
pub trait TransportOpener: Send + Sync {
    async fn open(
        &self,
        selector: &ResourceSelector,
    ) -> std::result::Result<Box<dyn Transport>, OpenError>;
}
