//! SCPI device session: the protocol core.
//!
//! A [`DeviceSession`] owns one opened [`Transport`] and provides the paced
//! command/query primitives every capability adapter is built on. The wire
//! protocol is half-duplex request/response, so the session inserts one
//! settling delay around every transaction and never pipelines; holding the
//! session by `&mut` makes a second in-flight transaction unrepresentable.
//!
//! A session is *identified* once `*IDN?` has answered. Command and query
//! helpers are deliberate no-ops before identification and after a reset
//! invalidates the identity -- scripted sequences keep running against a
//! device that went away and simply collect no answers.
//!
//! Failure policy: a transport failure inside a single query degrades to
//! `None` with a logged warning. Only construction-time failures are errors.

use crate::error::{BenchError, Result};
use crate::hardware::{OpenError, Transport, TransportOpener};
use crate::hardware::ResourceSelector;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default delay between write and read of a query, also applied after
/// commands so all transactions are spaced. Some instruments drop traffic
/// arriving faster than this.
pub const DEFAULT_QUERY_DELAY: Duration = Duration::from_millis(100);

const IDENTIFY_ATTEMPTS: u32 = 3;

/// Identity decoded from one `*IDN?` response.
///
/// Fields the response did not carry read `"Unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware: String,
}

impl DeviceIdentity {
    /// Decode the comma-separated `*IDN?` form.
    pub fn parse(idn: &str) -> Self {
        let mut fields = idn.split(',').map(|f| f.trim().to_string());
        let mut next = || fields.next().unwrap_or_else(|| "Unknown".to_string());
        Self {
            manufacturer: next(),
            model: next(),
            serial_number: next(),
            firmware: next(),
        }
    }

    /// Short `MODEL-SERIAL` label used in transaction traces.
    pub fn label(&self) -> String {
        format!("{}-{}", self.model, self.serial_number)
    }
}

/// One half-duplex SCPI session over an owned transport.
pub struct DeviceSession {
    transport: Box<dyn Transport>,
    identity: Option<DeviceIdentity>,
    raw_identity: Option<String>,
    query_delay: Duration,
    verbose: bool,
    touched: bool,
    simulated: bool,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("resource", &self.transport.resource())
            .field("identity", &self.identity)
            .field("query_delay", &self.query_delay)
            .field("verbose", &self.verbose)
            .field("touched", &self.touched)
            .field("simulated", &self.simulated)
            .finish()
    }
}

impl DeviceSession {
    /// Wrap an already-opened transport. The session starts unidentified;
    /// call [`DeviceSession::identify`] before issuing traffic.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let simulated = transport.is_simulated();
        Self {
            transport,
            identity: None,
            raw_identity: None,
            query_delay: DEFAULT_QUERY_DELAY,
            verbose: false,
            touched: false,
            simulated,
        }
    }

    /// True once the identity round trip has succeeded and the session has
    /// not been reset or closed since.
    pub fn is_identified(&self) -> bool {
        self.identity.is_some()
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// The raw `*IDN?` response string, if identified.
    pub fn id(&self) -> Option<&str> {
        self.raw_identity.as_deref()
    }

    /// True once any command or query has been issued through this session.
    pub fn touched(&self) -> bool {
        self.touched
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn query_delay(&self) -> Duration {
        self.query_delay
    }

    pub fn set_query_delay(&mut self, delay: Duration) {
        self.query_delay = delay;
    }

    /// True when the transport is a simulated backend; pacing is skipped.
    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    pub fn resource(&self) -> &str {
        self.transport.resource()
    }

    fn pace(&self) -> impl std::future::Future<Output = ()> + Send {
        let delay = if self.simulated {
            Duration::ZERO
        } else {
            self.query_delay
        };
        async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
        }
    }

    fn trace(&self, text: &str) {
        let label = self
            .identity
            .as_ref()
            .map(DeviceIdentity::label)
            .unwrap_or_else(|| self.transport.resource().to_string());
        if self.verbose {
            info!("{label} : {text}");
        } else {
            debug!("{label} : {text}");
        }
    }

    /// Query the instrument identity, retrying because an instrument left in
    /// an error state by a prior connection often drops the first exchange.
    pub async fn identify(&mut self) -> Result<DeviceIdentity> {
        let mut last_err = crate::hardware::TransportError::Timeout;
        for attempt in 1..=IDENTIFY_ATTEMPTS {
            self.trace("*IDN?");
            let result = async {
                self.transport.write_line("*IDN?").await?;
                self.pace().await;
                self.transport.read_line().await
            }
            .await;
            self.pace().await;
            match result {
                Ok(idn) => {
                    let idn = idn.replace('\n', "");
                    self.trace(&idn);
                    let identity = DeviceIdentity::parse(&idn);
                    self.identity = Some(identity.clone());
                    self.raw_identity = Some(idn);
                    return Ok(identity);
                }
                Err(err) => {
                    warn!("identification attempt {attempt} failed: {err}");
                    last_err = err;
                }
            }
        }
        Err(BenchError::Transport(last_err))
    }

    /// Send a command line. Does nothing observable when unidentified.
    pub async fn command(&mut self, cmd: &str) -> Result<()> {
        self.touched = true;
        self.trace(cmd);
        if self.identity.is_none() {
            return Ok(());
        }
        self.transport.write_line(cmd).await?;
        self.pace().await;
        Ok(())
    }

    /// Write + delay + read, terminator-stripped.
    ///
    /// `None` means "no answer" -- unidentified session or a transport
    /// failure during this one transaction (logged as a warning). Callers
    /// must treat `None` as missing data, not as an error.
    pub async fn query(&mut self, cmd: &str) -> Option<String> {
        self.touched = true;
        self.trace(cmd);
        if self.identity.is_none() {
            return None;
        }
        let result = async {
            self.transport.write_line(cmd).await?;
            self.pace().await;
            self.transport.read_line().await
        }
        .await;
        self.pace().await;
        match result {
            Ok(response) => {
                let response = response.replace('\n', "");
                self.trace(&response);
                Some(response)
            }
            Err(err) => {
                warn!("while attempting {cmd}: backend error {err}");
                None
            }
        }
    }

    /// Like [`DeviceSession::query`] but returns the raw response bytes,
    /// framing and terminators intact. Used for binary block transfers.
    pub async fn query_raw(&mut self, cmd: &str) -> Option<Vec<u8>> {
        self.touched = true;
        self.trace(cmd);
        if self.identity.is_none() {
            return None;
        }
        let result = async {
            self.transport.write_line(cmd).await?;
            self.pace().await;
            self.transport.read_raw().await
        }
        .await;
        self.pace().await;
        match result {
            Ok(response) => {
                self.trace(&format!("<{} bytes>", response.len()));
                Some(response)
            }
            Err(err) => {
                warn!("while attempting {cmd}: backend error {err}");
                None
            }
        }
    }

    /// Query and parse an integer response. `None` when there was no answer
    /// or the answer did not parse.
    pub async fn query_int(&mut self, cmd: &str) -> Option<i64> {
        self.query(cmd).await?.trim().parse().ok()
    }

    /// Query and parse a float response. `None` when there was no answer;
    /// `Some(NAN)` when an answer arrived but did not parse -- distinct
    /// sentinels for "no response" and "unusable response".
    pub async fn query_float(&mut self, cmd: &str) -> Option<f64> {
        let response = self.query(cmd).await?;
        Some(response.trim().parse().unwrap_or(f64::NAN))
    }

    /// Reset the device and try to re-identify until `timeout` elapses.
    ///
    /// A zero timeout issues the reset without dropping the identity (used
    /// by devices whose reset needs no reconnect). Returns whether the
    /// session is identified afterwards; never errors on timeout.
    pub async fn reset(&mut self, timeout: Duration) -> bool {
        if self.identity.is_none() {
            return false;
        }
        self.trace("*RST");
        if let Err(err) = self.transport.write_line("*RST").await {
            warn!("reset write failed: {err}");
        }
        self.pace().await;

        if timeout > Duration::ZERO {
            self.identity = None;
            self.raw_identity = None;
        }
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            tokio::task::yield_now().await;
            if !self.simulated && self.transport.reopen().await.is_err() {
                continue;
            }
            self.trace("*OPC?");
            if self.transport.write_line("*OPC?").await.is_err() {
                continue;
            }
            self.pace().await;
            if self.transport.read_line().await.is_err() {
                continue;
            }
            self.pace().await;
            self.trace("*IDN?");
            if self.transport.write_line("*IDN?").await.is_err() {
                continue;
            }
            self.pace().await;
            match self.transport.read_line().await {
                Ok(idn) => {
                    self.pace().await;
                    let idn = idn.replace('\n', "");
                    self.identity = Some(DeviceIdentity::parse(&idn));
                    self.raw_identity = Some(idn);
                    break;
                }
                Err(_) => continue,
            }
        }
        self.is_identified()
    }

    /// Release the transport. The session becomes unidentified and every
    /// later command or query is a no-op.
    pub async fn close(&mut self) {
        if let Err(err) = self.transport.close().await {
            warn!("close failed: {err}");
        }
        self.identity = None;
        self.raw_identity = None;
    }

    // ------------------------------------------------------------------
    // IEEE 488.2 common-command surface
    // ------------------------------------------------------------------

    /// `*OPC?` -- blocks in the instrument until pending operations finish.
    pub async fn wait_op_complete(&mut self) -> Option<String> {
        self.query("*OPC?").await
    }

    /// True when the instrument reports the current operation complete.
    /// An invalid connection reads as "in progress".
    pub async fn operation_complete(&mut self) -> bool {
        self.query_int("*OPC?").await == Some(1)
    }

    /// `*OPC` -- set the OPC bit of the SESR once the current operation
    /// completes.
    pub async fn set_operation_complete(&mut self) -> Result<()> {
        self.command("*OPC").await
    }

    /// `*CLS` then `*ESR?`. Returns true when the event status register read
    /// back zero (reading it also clears it).
    pub async fn clear_status(&mut self) -> bool {
        if let Err(err) = self.command("*CLS").await {
            warn!("*CLS failed: {err}");
            return false;
        }
        self.query_int("*ESR?").await == Some(0)
    }

    /// Query and clear the standard event status register.
    pub async fn event_status(&mut self) -> Option<i64> {
        self.query_int("*ESR?").await
    }

    pub async fn event_status_enable(&mut self) -> Option<i64> {
        self.query_int("*ESE?").await
    }

    pub async fn set_event_status_enable(&mut self, mask: u16) -> Result<()> {
        self.command(&format!("*ESE {mask}")).await
    }

    /// Query and clear the status byte register.
    pub async fn status_byte(&mut self) -> Option<i64> {
        self.query_int("*STB?").await
    }

    pub async fn service_request_enable(&mut self) -> Option<i64> {
        self.query_int("*SRE?").await
    }

    pub async fn set_service_request_enable(&mut self, mask: u16) -> Result<()> {
        self.command(&format!("*SRE {mask}")).await
    }

    /// `*TST?` -- initiate a self test and return its result code.
    pub async fn self_test(&mut self) -> Option<i64> {
        self.query_int("*TST?").await
    }

    /// Names of the SESR bits set in `status`, highest bit first.
    pub fn decode_event_status(status: Option<i64>) -> Vec<&'static str> {
        const BITS: [&str; 16] = [
            "Reserved15",
            "Reserved14",
            "Reserved13",
            "Reserved12",
            "Reserved11",
            "Reserved10",
            "Reserved09",
            "Reserved08",
            "PowerOn",
            "UserRequest",
            "CommandError",
            "ExecutionError",
            "DeviceError",
            "QueryError",
            "RequestControl",
            "OperationComplete",
        ];
        match status {
            Some(value) => BITS
                .iter()
                .enumerate()
                .filter(|(i, _)| value & (1 << (15 - i)) != 0)
                .map(|(_, name)| *name)
                .collect(),
            None => vec!["No Status"],
        }
    }
}

/// Builds an identified [`DeviceSession`] from a resource selector.
///
/// # Example
/// ```no_run
/// use benchtop::hardware::{MockOpener, MockTransport, ResourceSelector};
/// use benchtop::session::SessionBuilder;
/// use std::time::Duration;
///
/// # async fn example() -> benchtop::error::Result<()> {
/// let opener = MockOpener::new(MockTransport::identified("ACME,M1,SN,1.0"));
/// let session = SessionBuilder::new(ResourceSelector::new(0x1AB1, 0x04CE))
///     .query_delay(Duration::from_millis(100))
///     .open(&opener)
///     .await?;
/// assert!(session.is_identified());
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    selector: ResourceSelector,
    query_delay: Duration,
    verbose: bool,
}

impl SessionBuilder {
    pub fn new(selector: ResourceSelector) -> Self {
        Self {
            selector,
            query_delay: DEFAULT_QUERY_DELAY,
            verbose: false,
        }
    }

    pub fn query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Open a matching transport and identify the instrument.
    ///
    /// # Errors
    /// - [`BenchError::Lookup`] when no resource matches the selector
    /// - [`BenchError::Connection`] when a matched resource fails to open or
    ///   refuses all identification attempts
    pub async fn open(self, opener: &dyn TransportOpener) -> Result<DeviceSession> {
        let transport = opener.open(&self.selector).await.map_err(|err| match err {
            OpenError::NotFound(selector) => BenchError::Lookup(selector),
            OpenError::Open { resource, reason } => {
                BenchError::Connection(format!("{resource} did not open: {reason}"))
            }
        })?;

        let mut session = DeviceSession::new(transport);
        session.query_delay = self.query_delay;
        session.verbose = self.verbose;

        if let Err(err) = session.identify().await {
            return Err(BenchError::Connection(format!(
                "{} did not open: {err}",
                session.resource()
            )));
        }
        info!("connected {}", session.id().unwrap_or("<unidentified>"));
        Ok(session)
    }
}
