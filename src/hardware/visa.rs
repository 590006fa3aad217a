//! VISA-backed transport (feature `instrument_visa`).
//!
//! Wraps the `visa-rs` session as a [`Transport`]. Resource matching follows
//! the bench convention: list `?*::INSTR` resources and take the first whose
//! resource string contains the `0xVVVV::0xPPPP[::SERIAL]` fragment; when the
//! list comes up empty and the selector carries a TCP/IP address, fall back
//! to `TCPIP0::<addr>::INSTR`. Some VISA backends do not enumerate every
//! attached instrument, so the address fallback is load-bearing in practice.

use super::{OpenError, ResourceSelector, Transport, TransportError, TransportOpener};
use async_trait::async_trait;
use std::ffi::CString;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::info;
use visa_rs::prelude::*;

fn io_err(err: impl std::fmt::Display) -> TransportError {
    TransportError::Io(err.to_string())
}

/// One opened VISA instrument session.
pub struct VisaTransport {
    instrument: Option<Instrument>,
    rm: DefaultRM,
    resource: String,
    timeout: Duration,
}

impl VisaTransport {
    /// Open `resource` with the given I/O timeout.
    pub fn open(resource: &str, timeout: Duration) -> Result<Self, OpenError> {
        let rm = DefaultRM::new().map_err(|e| OpenError::Open {
            resource: resource.to_string(),
            reason: format!("VISA resource manager unavailable: {e}"),
        })?;
        let instrument = open_resource(&rm, resource, timeout)?;
        info!("opened VISA resource {resource}");
        Ok(Self {
            instrument: Some(instrument),
            rm,
            resource: resource.to_string(),
            timeout,
        })
    }

    fn instrument(&mut self) -> Result<&mut Instrument, TransportError> {
        self.instrument.as_mut().ok_or(TransportError::Closed)
    }
}

fn open_resource(
    rm: &DefaultRM,
    resource: &str,
    timeout: Duration,
) -> Result<Instrument, OpenError> {
    let name = CString::new(resource).map_err(|e| OpenError::Open {
        resource: resource.to_string(),
        reason: e.to_string(),
    })?;
    let mut instrument = rm
        .open(
            &name.into(),
            AccessMode::NO_LOCK,
            visa_rs::TIMEOUT_IMMEDIATE,
        )
        .map_err(|e| OpenError::Open {
            resource: resource.to_string(),
            reason: e.to_string(),
        })?;
    let timeout_ms = timeout.as_millis() as u32;
    instrument
        .set_timeout(timeout_ms)
        .map_err(|e| OpenError::Open {
            resource: resource.to_string(),
            reason: format!("failed to set timeout to {timeout_ms}ms: {e}"),
        })?;
    Ok(instrument)
}

#[async_trait]
impl Transport for VisaTransport {
    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let payload = format!("{line}\n");
        self.instrument()?
            .write_all(payload.as_bytes())
            .map_err(io_err)
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        let raw = self.read_raw().await?;
        let text = String::from_utf8_lossy(&raw);
        Ok(text
            .trim_end_matches('\0')
            .trim_end_matches(['\r', '\n'])
            .to_string())
    }

    async fn read_raw(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; 1 << 20];
        let n = self.instrument()?.read(&mut buf).map_err(io_err)?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn reopen(&mut self) -> Result<(), TransportError> {
        let instrument =
            open_resource(&self.rm, &self.resource, self.timeout).map_err(io_err)?;
        self.instrument = Some(instrument);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.instrument = None;
        Ok(())
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

/// Opens VISA resources by vendor/product/serial fragment match.
pub struct VisaOpener {
    timeout: Duration,
}

impl VisaOpener {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for VisaOpener {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl TransportOpener for VisaOpener {
    async fn open(
        &self,
        selector: &ResourceSelector,
    ) -> Result<Box<dyn Transport>, OpenError> {
        let rm = DefaultRM::new().map_err(|e| OpenError::Open {
            resource: selector.fragment(),
            reason: format!("VISA resource manager unavailable: {e}"),
        })?;

        let fragment = selector.fragment();
        let expr = CString::new("?*::INSTR").map_err(|e| OpenError::Open {
            resource: fragment.clone(),
            reason: e.to_string(),
        })?;
        let mut matched = None;
        if let Ok(list) = rm.find_res_list(&expr.into()) {
            for res in list.flatten() {
                let name = res.to_string();
                if name.contains(&fragment) {
                    matched = Some(name);
                    break;
                }
            }
        }

        // Backends that under-report the resource list still reach LAN
        // instruments through the address fallback.
        let resource = match (matched, &selector.address) {
            (Some(name), _) => name,
            (None, Some(address)) => format!("TCPIP0::{address}::INSTR"),
            (None, None) => return Err(OpenError::NotFound(selector.to_string())),
        };

        let transport = VisaTransport::open(&resource, self.timeout)?;
        Ok(Box::new(transport))
    }
}
