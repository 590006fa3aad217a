//! Oscilloscope capability contract.
//!
//! Conventions shared by every adapter:
//!
//! - Channels are 1-based and validated against the device's analog channel
//!   count before any wire traffic.
//! - Horizontal position is positive when the trigger sits right of center;
//!   adapters invert the sign as their dialect requires.
//! - Query operations return `Ok(None)` when the instrument gave no usable
//!   answer; errors are reserved for caller bugs and unsupported operations.

use crate::dialect::DialectTable;
use crate::error::{BenchError, Result};
use crate::session::DeviceSession;
use crate::types::{
    DataEncoding, MathOperator, MeasurementKind, TriggerEdge, TriggerStatus, TriggerSweep,
    VerticalUnit,
};
use crate::waveform::{WaveSource, WaveformData};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

/// Measured values per requested kind, in request order within each kind.
/// Entries are NaN where a sample was rejected or never arrived.
pub type MeasurementResult = HashMap<MeasurementKind, Vec<f64>>;

/// Source of a measurement: one channel, or two combined into the math trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureSource {
    Channel(usize),
    /// Two channels combined by the request's math operator.
    Math(usize, usize),
}

/// One measurement request.
///
/// `samples >= 1` takes that many rounds of every requested kind; a sample
/// whose magnitude exceeds `threshold` is recorded as NaN. `samples <= 0`
/// polls a single kind until a value inside the threshold appears or
/// `timeout` elapses, discarding out-of-band values along the way.
#[derive(Debug, Clone)]
pub struct MeasureRequest {
    pub source: MeasureSource,
    /// Kinds to sample; `None` means every kind the adapter supports.
    pub kinds: Option<Vec<MeasurementKind>>,
    pub samples: i32,
    /// Settling delay between source selection and the first sample.
    pub delay: Duration,
    /// Polling deadline for `samples <= 0`.
    pub timeout: Duration,
    /// Magnitude above which the instrument's reading is considered invalid.
    pub threshold: f64,
    /// Operator for a math source.
    pub math_op: MathOperator,
}

impl MeasureRequest {
    pub fn channel(channel: usize) -> Self {
        Self {
            source: MeasureSource::Channel(channel),
            kinds: None,
            samples: 1,
            delay: Duration::from_millis(500),
            timeout: Duration::ZERO,
            threshold: 1.0e37,
            math_op: MathOperator::Subtract,
        }
    }

    pub fn math(first: usize, second: usize) -> Self {
        Self {
            source: MeasureSource::Math(first, second),
            ..Self::channel(first)
        }
    }

    pub fn kinds(mut self, kinds: &[MeasurementKind]) -> Self {
        self.kinds = Some(kinds.to_vec());
        self
    }

    pub fn samples(mut self, samples: i32) -> Self {
        self.samples = samples;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn math_op(mut self, op: MathOperator) -> Self {
        self.math_op = op;
        self
    }

    /// Validate the request against an adapter's measurement dialect and
    /// resolve the kind list. Fails fast, before any wire traffic.
    pub fn resolve_kinds(
        &self,
        dialect: &DialectTable<MeasurementKind>,
    ) -> Result<Vec<MeasurementKind>> {
        let kinds: Vec<MeasurementKind> = match &self.kinds {
            Some(kinds) => {
                for kind in kinds {
                    if !dialect.supports(*kind) {
                        return Err(BenchError::Contract(format!(
                            "measurement kind {kind:?} is not available on this instrument"
                        )));
                    }
                }
                kinds.clone()
            }
            None => MeasurementKind::ALL
                .into_iter()
                .filter(|kind| dialect.supports(*kind))
                .collect(),
        };
        if kinds.is_empty() {
            return Err(BenchError::Contract(
                "no measurable kinds requested".into(),
            ));
        }
        if self.samples < 1 && kinds.len() > 1 {
            return Err(BenchError::Contract(
                "a single measurement kind is required for polling".into(),
            ));
        }
        Ok(kinds)
    }
}

/// Queried edge trigger configuration. Fields the instrument did not answer
/// (or answered with a drifted token) are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeTriggerSettings {
    pub source: Option<usize>,
    pub edge: Option<TriggerEdge>,
    pub level: Option<f64>,
}

/// The oscilloscope capability contract.
#[async_trait]
pub trait Oscilloscope: Send {
    /// Number of analog channels on this device.
    fn analog_channels(&self) -> usize;

    /// Largest sample count one transfer transaction may carry.
    fn max_data_batch(&self) -> usize;

    fn session(&self) -> &DeviceSession;

    fn session_mut(&mut self) -> &mut DeviceSession;

    /// Channel range check: 1-based, before any transaction.
    fn check_channel(&self, channel: usize) -> Result<()> {
        BenchError::check_channel(channel, self.analog_channels())
    }

    async fn display(&mut self, channel: usize) -> Result<Option<bool>>;
    async fn set_display(&mut self, channel: usize, on: bool) -> Result<()>;

    /// Vertical unit of the channel, where the device supports units. An
    /// adapter without unit support answers `Ok(None)` and ignores the
    /// setter silently.
    async fn vertical_unit(&mut self, channel: usize) -> Result<Option<VerticalUnit>>;
    async fn set_vertical_unit(&mut self, channel: usize, unit: VerticalUnit) -> Result<()>;

    async fn probe_scale(&mut self, channel: usize) -> Result<Option<f64>>;
    async fn set_probe_scale(&mut self, channel: usize, nx: f64) -> Result<()>;

    async fn vertical_scale(&mut self, channel: usize) -> Result<Option<f64>>;
    async fn set_vertical_scale(&mut self, channel: usize, vdiv: f64) -> Result<()>;

    async fn vertical_position(&mut self, channel: usize) -> Result<Option<f64>>;
    async fn set_vertical_position(&mut self, channel: usize, offset: f64) -> Result<()>;

    /// Seconds per horizontal division.
    async fn horizontal_scale(&mut self) -> Result<Option<f64>>;
    async fn set_horizontal_scale(&mut self, hdiv_sec: f64) -> Result<()>;

    /// Trigger alignment on the display; positive is right of center.
    async fn horizontal_position(&mut self) -> Result<Option<f64>>;
    async fn set_horizontal_position(&mut self, offset_sec: f64) -> Result<()>;

    async fn trigger_edge(&mut self) -> Result<EdgeTriggerSettings>;
    async fn set_trigger_edge(
        &mut self,
        channel: usize,
        edge: TriggerEdge,
        level: f64,
    ) -> Result<()>;

    /// Park the trigger: rising edge at level zero.
    async fn trigger_off(&mut self, channel: usize) -> Result<()> {
        self.set_trigger_edge(channel, TriggerEdge::Rising, 0.0).await
    }

    /// Seconds between trigger re-arms.
    async fn trigger_holdoff(&mut self) -> Result<Option<f64>>;
    async fn set_trigger_holdoff(&mut self, holdoff: Duration) -> Result<()>;

    async fn trigger_status(&mut self) -> Result<Option<TriggerStatus>>;

    /// Poll the trigger status until one of `targets` is observed or
    /// `timeout` elapses. Always returns the last observed status -- a
    /// timeout is an answer here, not an error. Transaction tracing is
    /// suppressed for the duration of the poll.
    async fn wait_for_trigger_status(
        &mut self,
        targets: &[TriggerStatus],
        timeout: Duration,
    ) -> Result<Option<TriggerStatus>> {
        let verbose = self.session().verbose();
        self.session_mut().set_verbose(false);

        let deadline = Instant::now() + timeout;
        let mut done = false;
        while Instant::now() < deadline && !done {
            tokio::task::yield_now().await;
            match self.trigger_status().await {
                Ok(Some(status)) if targets.contains(&status) => done = true,
                Ok(_) => {}
                Err(err) => {
                    self.session_mut().set_verbose(verbose);
                    return Err(err);
                }
            }
        }

        let last = self.trigger_status().await;
        self.session_mut().set_verbose(verbose);
        last
    }

    async fn sweep(&mut self) -> Result<Option<TriggerSweep>>;
    async fn set_sweep(&mut self, sweep: TriggerSweep) -> Result<()>;

    /// Start acquiring in the given sweep mode.
    async fn run(&mut self, sweep: TriggerSweep) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;

    /// Current sample rate in Sa/s.
    async fn sample_rate(&mut self) -> Result<Option<f64>>;

    /// Take scalar measurements; see [`MeasureRequest`]. On-screen
    /// measurement artifacts are cleared before returning.
    async fn measure(&mut self, request: &MeasureRequest) -> Result<MeasurementResult>;

    /// Transfer waveform samples, chunking as the device requires. A short,
    /// empty, or missing chunk ends the transfer normally with whatever was
    /// accumulated.
    async fn data(
        &mut self,
        source: WaveSource,
        window: Option<(usize, usize)>,
        encoding: DataEncoding,
    ) -> Result<WaveformData>;

    /// Capture the instrument screen to `path`; the format follows the file
    /// extension. Returns whether image data was actually retrieved.
    async fn screen_capture(&mut self, path: &Path) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurements() -> DialectTable<MeasurementKind> {
        DialectTable::new()
            .entry(MeasurementKind::VMax, "VMAX", &[])
            .entry(MeasurementKind::Frequency, "FREQuency", &[])
    }

    #[test]
    fn default_kinds_follow_the_dialect() {
        let request = MeasureRequest::channel(1);
        let kinds = request.resolve_kinds(&measurements()).unwrap();
        assert_eq!(
            kinds,
            vec![MeasurementKind::VMax, MeasurementKind::Frequency]
        );
    }

    #[test]
    fn polling_requires_exactly_one_kind() {
        let request = MeasureRequest::channel(1)
            .samples(0)
            .kinds(&[MeasurementKind::VMax, MeasurementKind::VMin]);
        assert!(request.resolve_kinds(&measurements()).is_err());

        let request = MeasureRequest::channel(1)
            .samples(0)
            .kinds(&[MeasurementKind::VMax]);
        assert!(request.resolve_kinds(&measurements()).is_ok());
    }
}
