//! Tektronix MSO 4, 5, and 6 series oscilloscopes.
//!
//! Binary waveform transfers (signed 8- and 16-bit) with a semicolon-
//! separated outgoing preamble; raw codes are converted to volts through the
//! preamble's y scaling. Model variants share this adapter through a product
//! spec: the MSO58 differs from the base MSO456 only in channel count.

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
    resolve_window, strip_block_header, unpack_codes, WaveSource, WaveformData,
    WaveformPreamble,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

pub const USB_VID: u16 = 0x0699;

/// Product constants separating the members of this family.
#[derive(Debug, Clone, Copy)]
pub struct Mso456Spec {
    pub model: &'static str,
    pub usb_pid: u16,
    pub analog_channels: usize,
}

pub const MSO456: Mso456Spec = Mso456Spec {
    model: "MSO456",
    usb_pid: 0x0522,
    analog_channels: 4,
};

pub const MSO58: Mso456Spec = Mso456Spec {
    model: "MSO58",
    usb_pid: 0x0522,
    analog_channels: 8,
};

const MAX_DATA_BATCH: usize = 10_000;
/// Chunks at or below this length mean the record is exhausted.
const SHORT_CHUNK: usize = 1200;

static EDGES: Lazy<DialectTable<TriggerEdge>> = Lazy::new(|| {
    DialectTable::new()
        .entry(TriggerEdge::Rising, "RISe", &["RIS"])
        .entry(TriggerEdge::Falling, "FALL", &[])
        .entry(TriggerEdge::Any, "EITher", &["EIT"])
});

static SWEEPS: Lazy<DialectTable<TriggerSweep>> = Lazy::new(|| {
    // No true single-sweep trigger mode on this scope; SINGLE is commanded
    // as NORMal. Register SINGLE first so NORMal decodes to Normal.
    DialectTable::new()
        .entry(TriggerSweep::Single, "NORMal", &[])
        .entry(TriggerSweep::Normal, "NORMal", &["NORM"])
        .entry(TriggerSweep::Auto, "AUTO", &[])
});

static TRIGGER_STATUS: Lazy<DialectTable<TriggerStatus>> = Lazy::new(|| {
    DialectTable::new()
        .entry(TriggerStatus::Triggered, "TRIGGER", &[])
        .entry(TriggerStatus::Waiting, "READY", &["ARMED"])
        .entry(TriggerStatus::Auto, "AUTO", &[])
        .entry(TriggerStatus::Stopped, "SAVE", &[])
});

static MEASUREMENTS: Lazy<DialectTable<MeasurementKind>> = Lazy::new(|| {
    DialectTable::new()
        .entry(MeasurementKind::VMax, "MAXimum", &[])
        .entry(MeasurementKind::VMin, "MINImum", &[])
        .entry(MeasurementKind::VPeakToPeak, "PK2Pk", &[])
        .entry(MeasurementKind::VTop, "TOP", &[])
        .entry(MeasurementKind::VBase, "BASE", &[])
        .entry(MeasurementKind::VAmplitude, "AMPLITUDE", &[])
        .entry(MeasurementKind::VAverage, "MEAN", &[])
        .entry(MeasurementKind::VRms, "RMS", &[])
        .entry(MeasurementKind::Overshoot, "POVERSHOOT", &[])
        .entry(MeasurementKind::Preshoot, "NOVershoot", &[])
        .entry(MeasurementKind::Area, "AREA", &[])
        .entry(MeasurementKind::Period, "PERIOD", &[])
        .entry(MeasurementKind::Frequency, "FREQuency", &[])
        .entry(MeasurementKind::RiseTime, "RISETIME", &[])
        .entry(MeasurementKind::FallTime, "FALLTIME", &[])
        .entry(MeasurementKind::PositiveWidth, "PWIDth", &[])
        .entry(MeasurementKind::NegativeWidth, "NWidth", &[])
        .entry(MeasurementKind::PositiveDuty, "PDUTY", &[])
        .entry(MeasurementKind::NegativeDuty, "NDUTy", &[])
        .entry(MeasurementKind::PositiveSlew, "RISESLEWRATE", &[])
        .entry(MeasurementKind::NegativeSlew, "FALLSLEWRATE", &[])
});

static MATH_OPS: Lazy<DialectTable<MathOperator>> = Lazy::new(|| {
    DialectTable::new()
        .entry(MathOperator::Add, "ADD", &[])
        .entry(MathOperator::Subtract, "SUBTract", &["SUBT"])
        .entry(MathOperator::Multiply, "MULTiply", &["MULT"])
        .entry(MathOperator::Divide, "DIVision", &["DIV"])
});

static ENCODINGS: Lazy<DialectTable<DataEncoding>> = Lazy::new(|| {
    DialectTable::new()
        .entry(DataEncoding::Int8, "RIBinary", &[])
        .entry(DataEncoding::Int16Le, "SRIbinary", &[])
});

static IMAGE_FORMATS: Lazy<DialectTable<ImageFormat>> = Lazy::new(|| {
    DialectTable::new()
        .entry(ImageFormat::Png, "PNG", &[])
        .entry(ImageFormat::Jpeg, "JPEG", &[])
        .entry(ImageFormat::Bmp, "BMP", &[])
});

fn decode_channel_token(token: &str) -> Option<usize> {
    token.trim().strip_prefix("CH")?.parse().ok()
}

/// Tektronix MSO 4/5/6 series oscilloscope.
pub struct Mso456 {
    session: DeviceSession,
    spec: Mso456Spec,
}

impl Mso456 {
    /// Wrap an identified session. This scope needs no inter-transaction
    /// pacing, so the session's query delay is zeroed.
    pub fn new(mut session: DeviceSession, spec: Mso456Spec) -> Self {
        session.set_query_delay(Duration::ZERO);
        Self { session, spec }
    }

    pub async fn connect(
        opener: &dyn TransportOpener,
        spec: Mso456Spec,
        serial: Option<&str>,
        address: Option<&str>,
    ) -> Result<Self> {
        let mut selector = ResourceSelector::new(USB_VID, spec.usb_pid);
        if let Some(serial) = serial {
            selector = selector.with_serial(serial);
        }
        if let Some(address) = address {
            selector = selector.with_address(address);
        }
        let session = SessionBuilder::new(selector).open(opener).await?;
        Ok(Self::new(session, spec))
    }

    /// Reset and re-identify, then disable response headers again -- the
    /// factory default echoes command headers, which would poison every
    /// query decode.
    pub async fn reset(&mut self, timeout: Duration) -> bool {
        let recovered = self.session.reset(timeout).await;
        if let Err(err) = self.session.command(":HEADer 0").await {
            warn!("failed to disable response headers: {err}");
        }
        recovered
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
        let ((mut start, mut stop), explicit) = resolve_window(window, MAX_DATA_BATCH);

        match source {
            WaveSource::Channel(channel) => {
                self.session
                    .command(&format!(":DATa:SOUrce CH{channel}"))
                    .await?;
            }
            WaveSource::Math => {
                self.session.command(":DATa:SOUrce MATH1").await?;
            }
        }

        let token = ENCODINGS.encode(encoding)?;
        let width = encoding.bytes_per_point().unwrap_or(1);
        self.session
            .command(&format!(":DATa:ENCdg {token}"))
            .await?;
        self.session
            .command(&format!(":WFMOutpre:BYT_Nr {width}"))
            .await?;

        let preamble_text = self
            .session
            .query(":WFMOutpre?")
            .await
            .ok_or_else(|| BenchError::Waveform("no preamble response".into()))?;
        let preamble = WaveformPreamble::parse_semicolon(&preamble_text)?;

        let mut remaining: i64 = if explicit {
            (stop - start + 1) as i64
        } else {
            preamble.points as i64
        };

        let mut codes: Vec<f64> = Vec::new();
        while remaining > 0 {
            self.session
                .command(&format!(":DATa:START {start}"))
                .await?;
            self.session.command(&format!(":DATa:STOP {stop}")).await?;

            let chunk = match self.session.query_raw(":CURVe?").await {
                Some(bytes) => unpack_codes(strip_block_header(&bytes)?, encoding)?,
                None => break,
            };
            if chunk.is_empty() {
                break;
            }

            let len = chunk.len();
            remaining -= len as i64;
            codes.extend(chunk);

            if len > SHORT_CHUNK && remaining > 0 {
                start += len;
                stop = start + (remaining as usize).min(MAX_DATA_BATCH) - 1;
            } else {
                break;
            }
        }

        let values = preamble.scale_codes(&codes);
        let time = preamble.time_axis(values.len());
        Ok(WaveformData {
            values,
            time,
            preamble,
        })
    }
}

#[async_trait]
impl Oscilloscope for Mso456 {
    fn analog_channels(&self) -> usize {
        self.spec.analog_channels
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
        let response = self
            .session
            .query(&format!(":DISplay:WAVEView1:CH{channel}:STATE?"))
            .await;
        Ok(response.and_then(|token| match token.trim() {
            "1" | "ON" => Some(true),
            "0" | "OFF" => Some(false),
            _ => None,
        }))
    }

    async fn set_display(&mut self, channel: usize, on: bool) -> Result<()> {
        self.check_channel(channel)?;
        let state = if on { "ON" } else { "OFF" };
        self.session
            .command(&format!(":DISplay:WAVEView1:CH{channel}:STATE {state}"))
            .await
    }

    // Vertical units are not selectable on this scope; the getter has no
    // answer and the setter silently returns.
    async fn vertical_unit(&mut self, channel: usize) -> Result<Option<VerticalUnit>> {
        self.check_channel(channel)?;
        Ok(None)
    }

    async fn set_vertical_unit(&mut self, channel: usize, _unit: VerticalUnit) -> Result<()> {
        self.check_channel(channel)?;
        Ok(())
    }

    async fn probe_scale(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        let response = self
            .session
            .query(&format!(":CH{channel}:PROBe:SET?"))
            .await;
        // Response shape: ATTENUATION 10X
        Ok(response.and_then(|text| {
            let mut parts = text.split_whitespace();
            let _keyword = parts.next()?;
            parts.next()?.trim_end_matches('X').parse().ok()
        }))
    }

    async fn set_probe_scale(&mut self, channel: usize, nx: f64) -> Result<()> {
        self.check_channel(channel)?;
        self.session
            .command(&format!(":CH{channel}:PROBe:SET \"ATTENUATION {nx}X\""))
            .await
    }

    async fn vertical_scale(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        Ok(self
            .session
            .query_float(&format!(":CH{channel}:SCALe?"))
            .await)
    }

    async fn set_vertical_scale(&mut self, channel: usize, vdiv: f64) -> Result<()> {
        self.check_channel(channel)?;
        self.session
            .command(&format!(":CH{channel}:SCALe {vdiv}"))
            .await
    }

    async fn vertical_position(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        Err(BenchError::NotSupported("MSO 4/5/6 vertical position"))
    }

    async fn set_vertical_position(&mut self, channel: usize, _offset: f64) -> Result<()> {
        self.check_channel(channel)?;
        Err(BenchError::NotSupported("MSO 4/5/6 vertical position"))
    }

    async fn horizontal_scale(&mut self) -> Result<Option<f64>> {
        Ok(self.session.query_float(":HORizontal:MODE:SCAle?").await)
    }

    async fn set_horizontal_scale(&mut self, hdiv_sec: f64) -> Result<()> {
        self.session
            .command(&format!(":HORizontal:MODE:SCAle {hdiv_sec}"))
            .await
    }

    async fn horizontal_position(&mut self) -> Result<Option<f64>> {
        Ok(self
            .session
            .query_float(":HORizontal:DELay:TIMe?")
            .await
            .map(|v| -v))
    }

    async fn set_horizontal_position(&mut self, offset_sec: f64) -> Result<()> {
        // Of the two position controls (percent and delay time) the delay
        // form is the one that maps to the contract; its sign is inverted
        // relative to ours.
        self.session.command(":HORizontal:DELay:MODe ON").await?;
        self.session
            .command(&format!(":HORizontal:DELay:TIMe {}", -offset_sec))
            .await
    }

    async fn trigger_edge(&mut self) -> Result<EdgeTriggerSettings> {
        let source = self
            .session
            .query(":TRIGger:A:EDGe:SOURce?")
            .await
            .and_then(|token| decode_channel_token(&token));
        let edge = self
            .session
            .query(":TRIGger:A:EDGe:SLOPe?")
            .await
            .and_then(|token| EDGES.decode(&token));
        let level = match source {
            Some(channel) => {
                self.session
                    .query_float(&format!(":TRIGger:A:LOWerthreshold:CH{channel}?"))
                    .await
            }
            None => None,
        };
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
        self.session
            .command(&format!(":TRIGger:A:LOWerthreshold:CH{channel} 0.0"))
            .await?;
        self.session.command(":TRIGger:A:TYPe EDGE").await?;
        self.session
            .command(&format!(":TRIGger:A:EDGe:SOURce CH{channel}"))
            .await?;
        self.session
            .command(&format!(":TRIGger:EDGe:SLOPe {slope}"))
            .await?;
        self.session
            .command(&format!(":TRIGger:A:LOWerthreshold:CH{channel} {level}"))
            .await
    }

    async fn trigger_holdoff(&mut self) -> Result<Option<f64>> {
        Ok(self
            .session
            .query_float(":TRIGger:A:HOLDoff:TIMe?")
            .await)
    }

    async fn set_trigger_holdoff(&mut self, holdoff: Duration) -> Result<()> {
        let mut seconds = holdoff.as_secs_f64();
        if seconds == 0.0 {
            seconds = 16.0e-9; // minimum the hardware accepts
        }
        self.session.command(":TRIGger:A:HOLDoff:BY TIMe").await?;
        self.session
            .command(&format!(":TRIGger:HOLDoff:TIMe {seconds}"))
            .await
    }

    async fn trigger_status(&mut self) -> Result<Option<TriggerStatus>> {
        let response = self.session.query(":TRIGger:STATE?").await;
        Ok(response.and_then(|token| TRIGGER_STATUS.decode(&token)))
    }

    async fn sweep(&mut self) -> Result<Option<TriggerSweep>> {
        let response = self.session.query(":TRIGger:A:MODe?").await;
        Ok(response.and_then(|token| SWEEPS.decode(&token)))
    }

    async fn set_sweep(&mut self, sweep: TriggerSweep) -> Result<()> {
        let token = SWEEPS.encode(sweep)?;
        self.session
            .command(&format!(":TRIGger:A:MODe {token}"))
            .await
    }

    async fn run(&mut self, sweep: TriggerSweep) -> Result<()> {
        self.session.command(":ACQuire:STATE RUN").await?;
        self.session.wait_op_complete().await;
        self.set_sweep(sweep).await?;
        self.session.wait_op_complete().await;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.session.command(":ACQuire:STATE STOP").await
    }

    async fn sample_rate(&mut self) -> Result<Option<f64>> {
        Err(BenchError::NotSupported("MSO 4/5/6 sample rate query"))
    }

    async fn measure(&mut self, request: &MeasureRequest) -> Result<MeasurementResult> {
        let kinds = request.resolve_kinds(&MEASUREMENTS)?;

        match request.source {
            MeasureSource::Channel(channel) => {
                self.check_channel(channel)?;
                self.session.wait_op_complete().await;
                self.session
                    .command(":DISplay:GLOBal:MATH1:STATE OFF")
                    .await?;
                self.session
                    .command(&format!(":MEASUrement:IMMed:SOURce CH{channel}"))
                    .await?;
            }
            MeasureSource::Math(first, second) => {
                self.check_channel(first)?;
                self.check_channel(second)?;
                let op = MATH_OPS.encode(request.math_op)?;
                // One basic math trace keeps the bookkeeping simple.
                self.session.command(":MATH:MATH1:TYPe BASic").await?;
                self.session
                    .command(&format!(":MATH:MATH1:SOURCE1 CH{first}"))
                    .await?;
                self.session
                    .command(&format!(":MATH:MATH1:SOURCE2 CH{second}"))
                    .await?;
                self.session
                    .command(&format!(":MATH:MATH1:FUNCtion {op}"))
                    .await?;
                self.session.command(":DISplay:SELect:MATH MATH1").await?;
                self.session
                    .command(":DISplay:GLOBal:MATH1:STATE ON")
                    .await?;

                // Scale the math trace so it is visible: amplitudes add under
                // add/subtract and multiply under multiply/divide.
                let s0 = self.vertical_scale(first).await?;
                let s1 = self.vertical_scale(second).await?;
                if let (Some(s0), Some(s1)) = (s0, s1) {
                    let scale = match request.math_op {
                        MathOperator::Multiply | MathOperator::Divide => s0 * s1,
                        _ => s0 + s1,
                    };
                    self.session
                        .command(&format!(
                            "DISplay:WAVEView1:MATH:MATH1:VERTical:SCAle {scale}"
                        ))
                        .await?;
                    self.session
                        .command(":DISplay:WAVEView1:MATH:MATH1:VERTical:POSition 0.0")
                        .await?;
                }

                self.session.wait_op_complete().await;
                self.session
                    .command(":MEASUrement:IMMed:SOURce MATH1")
                    .await?;
            }
        }

        tokio::time::sleep(request.delay).await;

        let mut result: MeasurementResult =
            kinds.iter().map(|kind| (*kind, Vec::new())).collect();

        if request.samples > 0 {
            for _ in 0..request.samples {
                for kind in &kinds {
                    let item = MEASUREMENTS.encode(*kind)?;
                    self.session
                        .command(&format!(":MEASUrement:IMMed:TYPE {item}"))
                        .await?;
                    let value = self
                        .session
                        .query_float(":MEASUrement:IMMed:VALue?")
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
                self.session
                    .command(&format!(":MEASUrement:IMMed:TYPE {item}"))
                    .await?;
                let value = self
                    .session
                    .query_float(":MEASUrement:IMMed:VALue?")
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
        ImageFormat::from_extension(ext)
            .filter(|format| IMAGE_FORMATS.supports(*format))
            .ok_or_else(|| BenchError::FileType(ext.to_string()))?;
        let ext = ext.to_uppercase();

        // The scope can only save to its own filesystem; park the image
        // there, read it back, and clean up.
        self.session
            .command("FILESystem:CWD \"C:/Users/Public\"")
            .await?;
        self.session
            .command(&format!(":SAVe:IMAGe \"Temp.{ext}\""))
            .await?;
        self.session.wait_op_complete().await;

        let verbose = self.session.verbose();
        self.session.set_verbose(false);
        let buf = self
            .session
            .query_raw(&format!("FILESystem:READFile \"Temp.{ext}\""))
            .await;
        self.session.set_verbose(verbose);

        let retrieved = match buf {
            Some(bytes) => {
                let payload = strip_block_header(&bytes)?;
                tokio::fs::write(path, payload).await?;
                true
            }
            None => false,
        };

        self.session
            .command(&format!("FILESystem:DELEte \"Temp.{ext}\""))
            .await?;
        Ok(retrieved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_tokens_round_trip_at_token_level() {
        // encode(decode(t)) == t for every canonical token, including the
        // aliased NORMal/SINGLE pair.
        for value in SWEEPS.values().collect::<Vec<_>>() {
            let token = SWEEPS.encode(value).unwrap();
            let decoded = SWEEPS.decode(token).unwrap();
            assert_eq!(SWEEPS.encode(decoded).unwrap(), token);
        }
        for value in TRIGGER_STATUS.values().collect::<Vec<_>>() {
            let token = TRIGGER_STATUS.encode(value).unwrap();
            let decoded = TRIGGER_STATUS.decode(token).unwrap();
            assert_eq!(TRIGGER_STATUS.encode(decoded).unwrap(), token);
        }
    }

    #[test]
    fn both_ready_and_armed_mean_waiting() {
        assert_eq!(
            TRIGGER_STATUS.decode("ARMED"),
            Some(TriggerStatus::Waiting)
        );
        assert_eq!(
            TRIGGER_STATUS.decode("READY"),
            Some(TriggerStatus::Waiting)
        );
    }

    #[test]
    fn single_sweep_is_commanded_as_normal() {
        assert_eq!(SWEEPS.encode(TriggerSweep::Single).unwrap(), "NORMal");
        assert_eq!(SWEEPS.decode("NORMal"), Some(TriggerSweep::Normal));
    }

    #[test]
    fn product_specs_differ_only_in_channels() {
        assert_eq!(MSO456.analog_channels, 4);
        assert_eq!(MSO58.analog_channels, 8);
        assert_eq!(MSO456.usb_pid, MSO58.usb_pid);
    }
}
