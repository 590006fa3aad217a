//! Rigol DS1000Z / MSO1000Z series oscilloscopes.
//!
//! Four analog channels. Waveform transfers support the ASCII and BYTE
//! encodings with a comma-separated preamble; reads beyond 250k points are
//! chunked, and the MATH source is limited to 1200 points in normal mode.

use crate::dialect::DialectTable;
use crate::error::{BenchError, Result};
use crate::hardware::{ResourceSelector, TransportOpener};
use crate::session::{DeviceSession, SessionBuilder};
use crate::traits::oscilloscope::{
    EdgeTriggerSettings, MeasureRequest, MeasureSource, MeasurementResult, Oscilloscope,
};
use crate::types::{
    DataEncoding, ImageFormat, MathOperator, MeasurementKind, TriggerEdge, TriggerStatus,
    TriggerSweep, VerticalUnit,
};
use crate::waveform::{
    parse_ascii_block, resolve_window, strip_block_header, unpack_codes, WaveSource,
    WaveformData, WaveformPreamble,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

pub const USB_VID: u16 = 0x1AB1;
pub const USB_PID: u16 = 0x04CE;

const ANALOG_CHANNELS: usize = 4;
/// Deepest record the instrument can hold.
pub const MAX_DATA_POINTS: usize = 12_000_000;
/// Largest window one transfer transaction may carry.
pub const MAX_DATA_BATCH: usize = 250_000;
/// The MATH source only transfers this many points in normal mode.
const MATH_POINT_LIMIT: usize = 1200;

static EDGES: Lazy<DialectTable<TriggerEdge>> = Lazy::new(|| {
    DialectTable::new()
        .entry(TriggerEdge::Rising, "POSitive", &["POS"])
        .entry(TriggerEdge::Falling, "NEGative", &["NEG"])
        .entry(TriggerEdge::Any, "RFALl", &["RFAL"])
});

static UNITS: Lazy<DialectTable<VerticalUnit>> = Lazy::new(|| {
    DialectTable::new()
        .entry(VerticalUnit::Volt, "VOLT", &["VOLTage"])
        .entry(VerticalUnit::Watt, "WATT", &["WATTage"])
        .entry(VerticalUnit::Amp, "AMP", &["AMPere"])
        .entry(VerticalUnit::Unknown, "UNK", &["UNKNown"])
});

static SWEEPS: Lazy<DialectTable<TriggerSweep>> = Lazy::new(|| {
    DialectTable::new()
        .entry(TriggerSweep::Auto, "AUTO", &[])
        .entry(TriggerSweep::Normal, "NORM", &["NORMal"])
        .entry(TriggerSweep::Single, "SING", &["SINGle"])
});

static TRIGGER_STATUS: Lazy<DialectTable<TriggerStatus>> = Lazy::new(|| {
    DialectTable::new()
        .entry(TriggerStatus::Triggered, "TD", &[])
        .entry(TriggerStatus::Waiting, "WAIT", &[])
        .entry(TriggerStatus::Auto, "AUTO", &["RUN"])
        .entry(TriggerStatus::Stopped, "STOP", &[])
});

static MEASUREMENTS: Lazy<DialectTable<MeasurementKind>> = Lazy::new(|| {
    DialectTable::new()
        .entry(MeasurementKind::VMax, "VMAX", &[])
        .entry(MeasurementKind::VMin, "VMIN", &[])
        .entry(MeasurementKind::VPeakToPeak, "VPP", &[])
        .entry(MeasurementKind::VTop, "VTOP", &[])
        .entry(MeasurementKind::VUpper, "VUPper", &[])
        .entry(MeasurementKind::VMiddle, "VMID", &[])
        .entry(MeasurementKind::VLower, "VLOWer", &[])
        .entry(MeasurementKind::VBase, "VBASe", &[])
        .entry(MeasurementKind::VAmplitude, "VAMP", &[])
        .entry(MeasurementKind::VAverage, "VAVG", &[])
        .entry(MeasurementKind::VRms, "VRMS", &[])
        .entry(MeasurementKind::TimeVMax, "TVMAX", &[])
        .entry(MeasurementKind::TimeVMin, "TVMIN", &[])
        .entry(MeasurementKind::Overshoot, "OVERshoot", &[])
        .entry(MeasurementKind::Preshoot, "PREshoot", &[])
        .entry(MeasurementKind::Area, "MARea", &[])
        .entry(MeasurementKind::PeriodArea, "MPARea", &[])
        .entry(MeasurementKind::Period, "PERiod", &[])
        .entry(MeasurementKind::Frequency, "FREQuency", &[])
        .entry(MeasurementKind::RiseTime, "RTIMe", &[])
        .entry(MeasurementKind::FallTime, "FTIMe", &[])
        .entry(MeasurementKind::PositiveWidth, "PWIDth", &[])
        .entry(MeasurementKind::NegativeWidth, "NWIDth", &[])
        .entry(MeasurementKind::PositiveDuty, "PDUTy", &[])
        .entry(MeasurementKind::NegativeDuty, "NDUTy", &[])
        .entry(MeasurementKind::PositiveSlew, "PSLEWrate", &[])
        .entry(MeasurementKind::NegativeSlew, "NSLEWrate", &[])
        .entry(MeasurementKind::Variance, "VARIance", &[])
});

static MATH_OPS: Lazy<DialectTable<MathOperator>> = Lazy::new(|| {
    DialectTable::new()
        .entry(MathOperator::Add, "ADD", &[])
        .entry(MathOperator::Subtract, "SUBTract", &["SUBT"])
        .entry(MathOperator::Multiply, "MULTiply", &["MULT"])
        .entry(MathOperator::Divide, "DIVision", &["DIV"])
        .entry(MathOperator::And, "AND", &[])
        .entry(MathOperator::Or, "OR", &[])
        .entry(MathOperator::Xor, "XOR", &[])
        .entry(MathOperator::Not, "NOT", &[])
        .entry(MathOperator::Fft, "FFT", &[])
        .entry(MathOperator::Integrate, "INTG", &[])
        .entry(MathOperator::Differentiate, "DIFF", &[])
        .entry(MathOperator::Sqrt, "SQRT", &[])
        .entry(MathOperator::Log10, "LOG", &[])
        .entry(MathOperator::Ln, "LN", &[])
        .entry(MathOperator::Exp, "EXP", &[])
        .entry(MathOperator::Abs, "ABS", &[])
});

static ENCODINGS: Lazy<DialectTable<DataEncoding>> = Lazy::new(|| {
    // Other encodings exist in the command set but carry nothing useful on
    // this scope.
    DialectTable::new()
        .entry(DataEncoding::Ascii, "ASCii", &["ASC"])
        .entry(DataEncoding::Uint8, "BYTE", &[])
});

static IMAGE_FORMATS: Lazy<DialectTable<ImageFormat>> = Lazy::new(|| {
    DialectTable::new()
        .entry(ImageFormat::Png, "PNG", &[])
        .entry(ImageFormat::Jpeg, "JPEG", &[])
        .entry(ImageFormat::Tiff, "TIFF", &[])
        .entry(ImageFormat::Bmp, "BMP24", &[])
});

/// Decode a `CHANnel<n>` / `CHAN<n>` source token to a channel number.
fn decode_channel_token(token: &str) -> Option<usize> {
    let token = token.trim();
    let digits = token
        .strip_prefix("CHANnel")
        .or_else(|| token.strip_prefix("CHAN"))?;
    digits.parse().ok()
}

/// Rigol DS1000Z family oscilloscope.
pub struct Ds1000z {
    session: DeviceSession,
}

impl Ds1000z {
    /// Wrap an identified session.
    pub fn new(session: DeviceSession) -> Self {
        Self { session }
    }

    /// Open and identify a DS1000Z by USB ids, optionally narrowed by serial
    /// number, with a TCP/IP address fallback.
    pub async fn connect(
        opener: &dyn TransportOpener,
        serial: Option<&str>,
        address: Option<&str>,
    ) -> Result<Self> {
        let mut selector = ResourceSelector::new(USB_VID, USB_PID);
        if let Some(serial) = serial {
            selector = selector.with_serial(serial);
        }
        if let Some(address) = address {
            selector = selector.with_address(address);
        }
        let session = SessionBuilder::new(selector).open(opener).await?;
        Ok(Self::new(session))
    }

    pub async fn close(&mut self) {
        self.session.close().await;
    }

    async fn transfer(
        &mut self,
        source: WaveSource,
        window: Option<(usize, usize)>,
        encoding: DataEncoding,
    ) -> Result<WaveformData> {
        let ((mut start, mut stop), mut explicit) = resolve_window(window, MAX_DATA_BATCH);

        match source {
            WaveSource::Channel(channel) => {
                self.session
                    .command(&format!(":WAVeform:SOURce CHANnel{channel}"))
                    .await?;
            }
            WaveSource::Math => {
                self.session.command(":WAVeform:SOURce MATH").await?;
            }
        }

        let format = ENCODINGS.encode(encoding)?;
        self.session
            .command(&format!(":WAVeform:FORMat {format}"))
            .await?;

        // MATH only reads in normal mode; channels read the full record.
        match source {
            WaveSource::Math => self.session.command(":WAVeform:MODE NORMal").await?,
            WaveSource::Channel(_) => self.session.command(":WAVeform:MODE MAXimum").await?,
        }

        if source == WaveSource::Math && stop - start > MATH_POINT_LIMIT {
            warn!("MATH source on this scope only supports {MATH_POINT_LIMIT} data points");
            start = 1;
            stop = MATH_POINT_LIMIT;
            explicit = true;
        }

        let preamble_text = self
            .session
            .query(":WAVeform:PREamble?")
            .await
            .ok_or_else(|| BenchError::Waveform("no preamble response".into()))?;
        let preamble = WaveformPreamble::parse_comma(&preamble_text)?;

        let mut remaining: i64 = if explicit {
            (stop - start + 1) as i64
        } else {
            preamble.points as i64
        };

        let mut codes: Vec<f64> = Vec::new();
        while remaining > 0 {
            self.session
                .command(&format!(":WAVeform:STARt {start}"))
                .await?;
            self.session
                .command(&format!(":WAVeform:STOP {stop}"))
                .await?;

            let chunk = if encoding == DataEncoding::Ascii {
                match self.session.query(":WAVeform:DATA?").await {
                    Some(text) => parse_ascii_block(&text)?,
                    None => break,
                }
            } else {
                match self.session.query_raw(":WAVeform:DATA?").await {
                    Some(bytes) => unpack_codes(strip_block_header(&bytes)?, encoding)?,
                    None => break,
                }
            };
            if chunk.is_empty() {
                break;
            }

            let len = chunk.len();
            remaining -= len as i64;
            codes.extend(chunk);

            // A short chunk is the instrument saying "that's all there is".
            if len > MATH_POINT_LIMIT && remaining > 0 {
                start += len;
                stop = start + (remaining as usize).min(MAX_DATA_BATCH) - 1;
            } else {
                break;
            }
        }

        let values = if encoding == DataEncoding::Ascii {
            codes
        } else {
            preamble.scale_codes(&codes)
        };
        let time = preamble.time_axis(values.len());
        Ok(WaveformData {
            values,
            time,
            preamble,
        })
    }
}

#[async_trait]
impl Oscilloscope for Ds1000z {
    fn analog_channels(&self) -> usize {
        ANALOG_CHANNELS
    }

    fn max_data_batch(&self) -> usize {
        MAX_DATA_BATCH
    }

    fn session(&self) -> &DeviceSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut DeviceSession {
        &mut self.session
    }

    async fn display(&mut self, channel: usize) -> Result<Option<bool>> {
        self.check_channel(channel)?;
        Ok(self
            .session
            .query_int(&format!(":CHANnel{channel}:DISPlay?"))
            .await
            .map(|v| v != 0))
    }

    async fn set_display(&mut self, channel: usize, on: bool) -> Result<()> {
        self.check_channel(channel)?;
        let state = if on { "ON" } else { "OFF" };
        self.session
            .command(&format!(":CHANnel{channel}:DISPlay {state}"))
            .await
    }

    async fn vertical_unit(&mut self, channel: usize) -> Result<Option<VerticalUnit>> {
        self.check_channel(channel)?;
        let response = self.session.query(&format!(":CHANnel{channel}:UNITs?")).await;
        Ok(response.and_then(|token| UNITS.decode(&token)))
    }

    async fn set_vertical_unit(&mut self, channel: usize, unit: VerticalUnit) -> Result<()> {
        self.check_channel(channel)?;
        let token = UNITS.encode(unit)?;
        self.session
            .command(&format!(":CHANnel{channel}:UNITs {token}"))
            .await
    }

    async fn probe_scale(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        Ok(self
            .session
            .query_float(&format!(":CHANnel{channel}:PROBe?"))
            .await)
    }

    async fn set_probe_scale(&mut self, channel: usize, nx: f64) -> Result<()> {
        self.check_channel(channel)?;
        self.session
            .command(&format!(":CHANnel{channel}:PROBe {nx}"))
            .await
    }

    async fn vertical_scale(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        Ok(self
            .session
            .query_float(&format!(":CHANnel{channel}:SCALe?"))
            .await)
    }

    async fn set_vertical_scale(&mut self, channel: usize, vdiv: f64) -> Result<()> {
        self.check_channel(channel)?;
        // Volts, watts, or amps per division depending on the channel unit;
        // 10 mV/div is the floor with a 10x probe.
        self.session
            .command(&format!(":CHANnel{channel}:SCALe {vdiv}"))
            .await
    }

    async fn vertical_position(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        Ok(self
            .session
            .query_float(&format!(":CHANnel{channel}:OFFSet?"))
            .await
            .map(|v| -v))
    }

    async fn set_vertical_position(&mut self, channel: usize, offset: f64) -> Result<()> {
        self.check_channel(channel)?;
        // Rigol's offset sign is inverted relative to the contract.
        self.session
            .command(&format!(":CHANnel{channel}:OFFSet {}", -offset))
            .await
    }

    async fn horizontal_scale(&mut self) -> Result<Option<f64>> {
        Ok(self.session.query_float(":TIMebase:MAIN:SCALe?").await)
    }

    async fn set_horizontal_scale(&mut self, hdiv_sec: f64) -> Result<()> {
        self.session
            .command(&format!(":TIMebase:MAIN:SCALe {hdiv_sec}"))
            .await
    }

    async fn horizontal_position(&mut self) -> Result<Option<f64>> {
        Ok(self
            .session
            .query_float(":TIMebase:MAIN:OFFSet?")
            .await
            .map(|v| -v))
    }

    async fn set_horizontal_position(&mut self, offset_sec: f64) -> Result<()> {
        // Rigol uses < 0 for right of center; the contract is > 0 for right.
        self.session
            .command(&format!(":TIMebase:MAIN:OFFSet {}", -offset_sec))
            .await
    }

    async fn trigger_edge(&mut self) -> Result<EdgeTriggerSettings> {
        let source = self
            .session
            .query(":TRIGger:EDGe:SOURce?")
            .await
            .and_then(|token| decode_channel_token(&token));
        let edge = self
            .session
            .query(":TRIGger:EDGe:SLOPe?")
            .await
            .and_then(|token| EDGES.decode(&token));
        let level = self.session.query_float(":TRIGger:EDGe:LEVel?").await;
        Ok(EdgeTriggerSettings {
            source,
            edge,
            level,
        })
    }

    async fn set_trigger_edge(
        &mut self,
        channel: usize,
        edge: TriggerEdge,
        level: f64,
    ) -> Result<()> {
        self.check_channel(channel)?;
        let slope = EDGES.encode(edge)?;
        // Zero the level before changing mode so the old level cannot fire
        // a stray trigger mid-reconfiguration.
        self.session.command(":TRIGger:EDGe:LEVel 0.0").await?;
        self.session.command(":TRIGger:MODE EDGE").await?;
        self.session
            .command(&format!(":TRIGger:EDGe:SOURce CHANnel{channel}"))
            .await?;
        self.session
            .command(&format!(":TRIGger:EDGe:SLOPe {slope}"))
            .await?;
        self.session
            .command(&format!(":TRIGger:EDGe:LEVel {level}"))
            .await
    }

    async fn trigger_holdoff(&mut self) -> Result<Option<f64>> {
        Ok(self.session.query_float(":TRIGger:HOLDoff?").await)
    }

    async fn set_trigger_holdoff(&mut self, holdoff: Duration) -> Result<()> {
        let mut seconds = holdoff.as_secs_f64();
        if seconds == 0.0 {
            seconds = 16.0e-9; // minimum the hardware accepts
        }
        self.session
            .command(&format!(":TRIGger:HOLDoff {seconds}"))
            .await
    }

    async fn trigger_status(&mut self) -> Result<Option<TriggerStatus>> {
        let response = self.session.query(":TRIGger:STATus?").await;
        Ok(response.and_then(|token| TRIGGER_STATUS.decode(&token)))
    }

    async fn sweep(&mut self) -> Result<Option<TriggerSweep>> {
        let response = self.session.query(":TRIGger:SWEep?").await;
        Ok(response.and_then(|token| SWEEPS.decode(&token)))
    }

    async fn set_sweep(&mut self, sweep: TriggerSweep) -> Result<()> {
        let token = SWEEPS.encode(sweep)?;
        self.session
            .command(&format!(":TRIGger:SWEep {token}"))
            .await
    }

    async fn run(&mut self, sweep: TriggerSweep) -> Result<()> {
        // The scope falls back to auto sweep when leaving stop, so :RUN must
        // be issued before the sweep mode is selected.
        self.session.command(":RUN").await?;
        self.set_sweep(sweep).await
    }

    async fn stop(&mut self) -> Result<()> {
        self.session.command(":STOP").await
    }

    async fn sample_rate(&mut self) -> Result<Option<f64>> {
        Ok(self.session.query_float(":ACQuire:SRATe?").await)
    }

    async fn measure(&mut self, request: &MeasureRequest) -> Result<MeasurementResult> {
        let kinds = request.resolve_kinds(&MEASUREMENTS)?;

        match request.source {
            MeasureSource::Channel(channel) => {
                self.check_channel(channel)?;
                self.session
                    .command(&format!(":MEASure:SOURce CHANnel{channel}"))
                    .await?;
            }
            MeasureSource::Math(first, second) => {
                self.check_channel(first)?;
                self.check_channel(second)?;
                let op = MATH_OPS.encode(request.math_op)?;
                self.session
                    .command(&format!(":MATH:SOURce1 CHANnel{first}"))
                    .await?;
                self.session
                    .command(&format!(":MATH:SOURce2 CHANnel{second}"))
                    .await?;
                self.session
                    .command(&format!(":MATH:LSOUrce1 CHANnel{first}"))
                    .await?;
                self.session
                    .command(&format!(":MATH:LSOUrce2 CHANnel{second}"))
                    .await?;
                self.session.command(":MATH:DISPlay ON").await?;
                self.session
                    .command(&format!(":MATH:OPERator {op}"))
                    .await?;
                self.session.command(":MEASure:SOURce MATH").await?;
            }
        }

        // Standard 10/50/90% thresholds.
        self.session.command(":MEASure:SETup:MIN 10").await?;
        self.session.command(":MEASure:SETup:MID 50").await?;
        self.session.command(":MEASure:SETup:MAX 90").await?;
        tokio::time::sleep(request.delay).await;

        let mut result: MeasurementResult =
            kinds.iter().map(|kind| (*kind, Vec::new())).collect();

        if request.samples > 0 {
            for _ in 0..request.samples {
                for kind in &kinds {
                    let item = MEASUREMENTS.encode(*kind)?;
                    let value = self
                        .session
                        .query_float(&format!(":MEASure:ITEM? {item}"))
                        .await;
                    let value = match value {
                        Some(v) if v.abs() > request.threshold => f64::NAN,
                        Some(v) => v,
                        None => f64::NAN,
                    };
                    if let Some(samples) = result.get_mut(kind) {
                        samples.push(value);
                    }
                }
            }
        } else {
            let kind = kinds[0];
            let item = MEASUREMENTS.encode(kind)?;
            let deadline = Instant::now() + request.timeout;
            while Instant::now() <= deadline {
                let value = self
                    .session
                    .query_float(&format!(":MEASure:ITEM? {item}"))
                    .await;
                if let Some(v) = value {
                    if v.abs() < request.threshold {
                        if let Some(samples) = result.get_mut(&kind) {
                            samples.push(v);
                        }
                        break;
                    }
                }
                tokio::task::yield_now().await;
            }
            if let Some(samples) = result.get_mut(&kind) {
                if samples.is_empty() {
                    samples.push(f64::NAN);
                }
            }
        }

        // Remove the detritus from the display.
        self.session.command(":MEASure:CLEar ALL").await?;
        Ok(result)
    }

    async fn data(
        &mut self,
        source: WaveSource,
        window: Option<(usize, usize)>,
        encoding: DataEncoding,
    ) -> Result<WaveformData> {
        if !ENCODINGS.supports(encoding) {
            return Err(BenchError::Contract(format!(
                "unsupported encoding {encoding:?} for this oscilloscope"
            )));
        }
        if let WaveSource::Channel(channel) = source {
            self.check_channel(channel)?;
        }

        let verbose = self.session.verbose();
        self.session.set_verbose(false);
        let result = self.transfer(source, window, encoding).await;
        self.session.set_verbose(verbose);
        result
    }

    async fn screen_capture(&mut self, path: &Path) -> Result<bool> {
        if self.session.is_simulated() {
            warn!("screen capture not supported in simulation");
            return Ok(false);
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| BenchError::FileType(path.display().to_string()))?;
        let format = ImageFormat::from_extension(ext)
            .ok_or_else(|| BenchError::FileType(ext.to_string()))?;
        let token = IMAGE_FORMATS.encode(format)?;

        match self
            .session
            .query_raw(&format!(":DISP:DATA? ON,0,{token}"))
            .await
        {
            Some(bytes) => {
                let payload = strip_block_header(&bytes)?;
                tokio::fs::write(path, payload).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
