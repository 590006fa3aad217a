//! Waveform transfer decoding.
//!
//! Large sample sets come back as a sequence of length-prefixed chunks, each
//! framed as `#N<N digits giving the byte count><payload>`. How the payload
//! and the preamble describing it are spelled differs per vendor:
//!
//! - comma-separated preambles with ASCII or byte payloads (Rigol form)
//! - semicolon-separated preambles with fixed-width signed payloads that need
//!   `(code - y_reference) * y_increment + y_origin` scaling (Tek form)
//!
//! This module holds the framing, preamble, and payload decoders; the chunk
//! loop itself lives in each adapter because windowing commands are dialect-
//! specific.

use crate::error::{BenchError, Result};
use crate::types::DataEncoding;
use bytes::Buf;
use tracing::warn;

/// Normalized waveform preamble, built per transfer call and discarded after
/// decode.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformPreamble {
    /// Vendor point-format field(s), kept verbatim.
    pub format: String,
    /// Acquisition type field, kept verbatim.
    pub acquisition: String,
    /// Points in the selected record.
    pub points: usize,
    /// Transfer point count, where the dialect reports one.
    pub count: Option<usize>,
    pub x_increment: f64,
    pub x_origin: f64,
    pub x_reference: f64,
    pub y_increment: f64,
    pub y_origin: f64,
    pub y_reference: f64,
}

fn field<'a>(fields: &[&'a str], index: usize, name: &str) -> Result<&'a str> {
    fields
        .get(index)
        .copied()
        .ok_or_else(|| BenchError::Waveform(format!("preamble missing field {name}")))
}

fn float_field(fields: &[&str], index: usize, name: &str) -> Result<f64> {
    let raw = field(fields, index, name)?;
    raw.trim()
        .parse()
        .map_err(|_| BenchError::Waveform(format!("preamble field {name} unparsable: {raw:?}")))
}

fn int_field(fields: &[&str], index: usize, name: &str) -> Result<usize> {
    let raw = field(fields, index, name)?;
    raw.trim()
        .parse()
        .map_err(|_| BenchError::Waveform(format!("preamble field {name} unparsable: {raw:?}")))
}

impl WaveformPreamble {
    /// Decode the comma-separated positional form:
    /// `format,type,points,count,xincr,xorig,xref,yincr,yorig,yref`.
    pub fn parse_comma(response: &str) -> Result<Self> {
        let fields: Vec<&str> = response.trim().split(',').collect();
        Ok(Self {
            format: field(&fields, 0, "format")?.to_string(),
            acquisition: field(&fields, 1, "type")?.to_string(),
            points: int_field(&fields, 2, "points")?,
            count: Some(int_field(&fields, 3, "count")?),
            x_increment: float_field(&fields, 4, "xincr")?,
            x_origin: float_field(&fields, 5, "xorig")?,
            x_reference: float_field(&fields, 6, "xref")?,
            y_increment: float_field(&fields, 7, "yincr")?,
            y_origin: float_field(&fields, 8, "yorig")?,
            y_reference: float_field(&fields, 9, "yref")?,
        })
    }

    /// Decode the semicolon-separated outgoing-preamble form. Field order
    /// follows the Tek `WFMOutpre?` layout: six format fields, acquisition,
    /// points at index 7, x scaling at 11..=13, y scaling at 15..=17 with the
    /// reference (offset) code at 16.
    pub fn parse_semicolon(response: &str) -> Result<Self> {
        let fields: Vec<&str> = response.trim().split(';').collect();
        Ok(Self {
            format: fields.get(0..6).unwrap_or_default().join(";"),
            acquisition: field(&fields, 6, "type")?.to_string(),
            points: int_field(&fields, 7, "points")?,
            count: None,
            x_increment: float_field(&fields, 11, "xincr")?,
            x_origin: float_field(&fields, 12, "xorig")?,
            x_reference: float_field(&fields, 13, "xref")?,
            y_increment: float_field(&fields, 15, "yincr")?,
            y_reference: float_field(&fields, 16, "yref")?,
            y_origin: float_field(&fields, 17, "yorig")?,
        })
    }

    /// Convert raw integer codes to physical units.
    pub fn scale_codes(&self, codes: &[f64]) -> Vec<f64> {
        codes
            .iter()
            .map(|code| (code - self.y_reference) * self.y_increment + self.y_origin)
            .collect()
    }

    /// Time axis matching a value array of length `len`: `t[i] = i * xincr`.
    ///
    /// The x-origin offset is deliberately not applied; this preserves the
    /// long-standing behavior callers depend on.
    pub fn time_axis(&self, len: usize) -> Vec<f64> {
        (0..len).map(|i| i as f64 * self.x_increment).collect()
    }
}

/// Strip the `#N<count>` block header, returning the payload (clamped to the
/// declared byte count when the response carries trailing terminator bytes).
/// A response without the `#` marker is returned unchanged -- some ASCII
/// modes omit the frame.
pub fn strip_block_header(response: &[u8]) -> Result<&[u8]> {
    if response.first() != Some(&b'#') {
        return Ok(response);
    }
    let digits = response
        .get(1)
        .and_then(|d| (*d as char).to_digit(10))
        .ok_or_else(|| BenchError::Waveform("malformed block header length digit".into()))?
        as usize;
    let header_len = 2 + digits;
    let count_bytes = response
        .get(2..header_len)
        .ok_or_else(|| BenchError::Waveform("truncated block header".into()))?;
    let count: usize = std::str::from_utf8(count_bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| BenchError::Waveform("malformed block header byte count".into()))?;
    let payload = &response[header_len..];
    Ok(if count <= payload.len() {
        &payload[..count]
    } else {
        payload
    })
}

/// Decode one ASCII chunk: optional block header, comma-separated floats.
pub fn parse_ascii_block(response: &str) -> Result<Vec<f64>> {
    let payload = strip_block_header(response.as_bytes())?;
    let text = std::str::from_utf8(payload)
        .map_err(|_| BenchError::Waveform("ASCII payload is not valid UTF-8".into()))?
        .replace('\n', "");
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|sample| {
            sample.trim().parse().map_err(|_| {
                BenchError::Waveform(format!("unparsable ASCII sample: {sample:?}"))
            })
        })
        .collect()
}

/// Unpack a binary chunk of fixed-width values into raw codes. Trailing bytes
/// that do not fill a whole sample (stray terminators) are dropped.
pub fn unpack_codes(payload: &[u8], encoding: DataEncoding) -> Result<Vec<f64>> {
    let width = encoding
        .bytes_per_point()
        .ok_or_else(|| BenchError::Waveform("ASCII payload handed to binary unpack".into()))?;
    let whole = payload.len() / width * width;
    let mut buf = &payload[..whole];
    let mut codes = Vec::with_capacity(whole / width);
    while buf.remaining() >= width {
        let code = match encoding {
            DataEncoding::Int8 => f64::from(buf.get_i8()),
            DataEncoding::Uint8 => f64::from(buf.get_u8()),
            DataEncoding::Int16Be => f64::from(buf.get_i16()),
            DataEncoding::Int16Le => f64::from(buf.get_i16_le()),
            DataEncoding::Uint16Be => f64::from(buf.get_u16()),
            DataEncoding::Uint16Le => f64::from(buf.get_u16_le()),
            DataEncoding::Float32Be => f64::from(buf.get_f32()),
            DataEncoding::Float32Le => f64::from(buf.get_f32_le()),
            DataEncoding::Ascii => unreachable!("rejected above"),
        };
        codes.push(code);
    }
    Ok(codes)
}

/// Resolve a transfer window: explicit `(start, stop)` swapped into order
/// with a warning when inverted, or the default full batch. The second
/// element reports whether the caller named a window (an explicit window
/// bounds the point count; a default one reads to the preamble's record
/// length).
pub fn resolve_window(
    window: Option<(usize, usize)>,
    default_stop: usize,
) -> ((usize, usize), bool) {
    match window {
        Some((start, stop)) => {
            if stop < start {
                warn!("waveform window swapped for order: ({start}, {stop})");
                ((stop, start), true)
            } else {
                ((start, stop), true)
            }
        }
        None => ((1, default_stop), false),
    }
}

/// Source of a waveform transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveSource {
    /// A physical analog channel.
    Channel(usize),
    /// The derived math trace.
    Math,
}

/// Result of one waveform transfer: physically-scaled values, matching time
/// axis, and the preamble that described the record.
#[derive(Debug, Clone)]
pub struct WaveformData {
    pub values: Vec<f64>,
    pub time: Vec<f64>,
    pub preamble: WaveformPreamble,
}
