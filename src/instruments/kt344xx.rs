//! Keysight / Agilent 34460A-34470A bench multimeters.
//!
//! The two brands speak the same dialect and differ only in USB ids (the
//! Keysight line is the Agilent line rebranded), so one adapter covers both
//! through a vendor spec. Mode and range are commanded through `CONFigure`
//! subtrees with per-mode discrete range sets, validated client-side.

use crate::dialect::DialectTable;
use crate::error::{BenchError, Result};
use crate::hardware::{ResourceSelector, TransportOpener};
use crate::session::{DeviceSession, SessionBuilder};
use crate::traits::multimeter::MultiMeter;
use crate::types::{MeterMode, MeterRange};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::time::Duration;

/// Vendor constants separating the rebrands.
#[derive(Debug, Clone, Copy)]
pub struct Kt344xxSpec {
    pub vendor: &'static str,
    pub usb_vid: u16,
    pub usb_pid: u16,
}

pub const KEYSIGHT_344XXA: Kt344xxSpec = Kt344xxSpec {
    vendor: "Keysight",
    usb_vid: 0x2A8D,
    usb_pid: 0x0201,
};

pub const AGILENT_344XXA: Kt344xxSpec = Kt344xxSpec {
    vendor: "Agilent",
    usb_vid: 0x0957,
    usb_pid: 0x0000,
};

const VOLTAGE_RANGES: [f64; 5] = [0.2, 1.0, 10.0, 100.0, 1000.0];
const CURRENT_RANGES: [f64; 7] = [0.0001, 0.001, 0.01, 0.1, 1.0, 3.0, 10.0];
const RESISTANCE_RANGES: [f64; 8] = [
    1.0e2, 1.0e3, 1.0e4, 1.0e5, 1.0e6, 1.0e7, 1.0e8, 1.0e9,
];
const FREQUENCY_SPAN: (f64, f64) = (3.0, 300_000.0);
const PERIOD_SPAN: (f64, f64) = (3.33e-6, 0.33333);

// CONFigure? answers in the short form; accept both spellings.
static MODES: Lazy<DialectTable<MeterMode>> = Lazy::new(|| {
    DialectTable::new()
        .entry(MeterMode::DcVolt, "VOLT", &["VOLT:DC"])
        .entry(MeterMode::AcVolt, "VOLT:AC", &[])
        .entry(MeterMode::DcAmp, "CURR", &["CURR:DC"])
        .entry(MeterMode::AcAmp, "CURR:AC", &[])
        // Four-wire resistance is folded into plain resistance.
        .entry(MeterMode::Resistance, "RES", &["FRES"])
        .entry(MeterMode::Frequency, "FREQ", &[])
        .entry(MeterMode::Period, "PER", &[])
});

fn range_error(name: &'static str, value: f64, min: f64, max: f64) -> BenchError {
    BenchError::ValueOutOfRange {
        name,
        value,
        min,
        max,
    }
}

/// Spell a validated range for the wire.
fn range_token(range: MeterRange, symbolic_default: &'static str) -> String {
    match range {
        MeterRange::Value(value) => value.to_string(),
        MeterRange::Auto => "AUTO".to_string(),
        MeterRange::Min => "MIN".to_string(),
        MeterRange::Max => "MAX".to_string(),
        MeterRange::Default => symbolic_default.to_string(),
    }
}

fn decode_range(token: &str) -> Option<MeterRange> {
    let token = token.trim().trim_matches('"');
    if let Ok(value) = token.parse() {
        return Some(MeterRange::Value(value));
    }
    match token {
        "AUTO" => Some(MeterRange::Auto),
        "MIN" => Some(MeterRange::Min),
        "MAX" => Some(MeterRange::Max),
        "DEF" | "DEFAULT" => Some(MeterRange::Default),
        _ => None,
    }
}

/// Keysight/Agilent 344xxA bench multimeter.
pub struct Kt344xx {
    session: DeviceSession,
    spec: Kt344xxSpec,
    settling_delay: Duration,
}

impl Kt344xx {
    pub fn new(session: DeviceSession, spec: Kt344xxSpec) -> Self {
        Self {
            session,
            spec,
            settling_delay: Duration::from_millis(100),
        }
    }

    pub async fn connect(
        opener: &dyn TransportOpener,
        spec: Kt344xxSpec,
        serial: Option<&str>,
        address: Option<&str>,
    ) -> Result<Self> {
        let mut selector = ResourceSelector::new(spec.usb_vid, spec.usb_pid);
        if let Some(serial) = serial {
            selector = selector.with_serial(serial);
        }
        if let Some(address) = address {
            selector = selector.with_address(address);
        }
        let session = SessionBuilder::new(selector).open(opener).await?;
        Ok(Self::new(session, spec))
    }

    pub fn vendor(&self) -> &'static str {
        self.spec.vendor
    }

    pub async fn close(&mut self) {
        self.session.close().await;
    }

    fn validate_discrete(
        range: MeterRange,
        allowed: &[f64],
        name: &'static str,
    ) -> Result<()> {
        match range {
            MeterRange::Value(value) => {
                if allowed.contains(&value) {
                    Ok(())
                } else {
                    Err(range_error(name, value, allowed[0], allowed[allowed.len() - 1]))
                }
            }
            _ => Ok(()),
        }
    }

    fn validate_span(
        range: MeterRange,
        span: (f64, f64),
        name: &'static str,
    ) -> Result<()> {
        match range {
            MeterRange::Value(value) => {
                if value >= span.0 && value <= span.1 {
                    Ok(())
                } else {
                    Err(range_error(name, value, span.0, span.1))
                }
            }
            // Frequency and period only take MIN/MAX/DEF symbolically.
            MeterRange::Auto => Err(BenchError::Contract(format!(
                "{name} range does not accept AUTO"
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl MultiMeter for Kt344xx {
    fn session(&self) -> &DeviceSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut DeviceSession {
        &mut self.session
    }

    fn settling_delay(&self) -> Duration {
        self.settling_delay
    }

    fn set_settling_delay(&mut self, delay: Duration) {
        self.settling_delay = delay;
    }

    async fn set_mode_range(&mut self, range: MeterRange, mode: MeterMode) -> Result<()> {
        let command = match mode {
            MeterMode::DcVolt => {
                Self::validate_discrete(range, &VOLTAGE_RANGES, "volts range")?;
                format!("CONFigure:VOLTage:DC {}", range_token(range, "DEFAULT"))
            }
            MeterMode::AcVolt => {
                Self::validate_discrete(range, &VOLTAGE_RANGES, "volts range")?;
                format!("CONFigure:VOLTage:AC {}", range_token(range, "DEFAULT"))
            }
            MeterMode::DcAmp => {
                Self::validate_discrete(range, &CURRENT_RANGES, "current range")?;
                format!("CONFigure:CURRent:DC {}", range_token(range, "DEFAULT"))
            }
            MeterMode::AcAmp => {
                Self::validate_discrete(range, &CURRENT_RANGES, "current range")?;
                format!("CONFigure:CURRent:AC {}", range_token(range, "DEFAULT"))
            }
            MeterMode::Resistance => {
                Self::validate_discrete(range, &RESISTANCE_RANGES, "resistance range")?;
                format!("CONFigure:RESistance {}", range_token(range, "DEFAULT"))
            }
            MeterMode::Frequency => {
                Self::validate_span(range, FREQUENCY_SPAN, "frequency range")?;
                format!("CONFigure:FREquency {}", range_token(range, "DEF"))
            }
            MeterMode::Period => {
                Self::validate_span(range, PERIOD_SPAN, "period range")?;
                format!("CONFigure:PERiod {}", range_token(range, "DEF"))
            }
        };
        self.session.command(&command).await?;
        self.session.command("TRIGger:SOURce:IMMediate").await
    }

    async fn mode_range(&mut self) -> Result<Option<(MeterMode, MeterRange)>> {
        // One response carries mode, range, and resolution; resolution is
        // fixed per model and ignored. Shape: "VOLT +1.000000E+01,+3.0E-06"
        let Some(response) = self.session.query("CONFigure?").await else {
            return Ok(None);
        };
        let mut parts = response.split(' ');
        let mode = parts
            .next()
            .map(|token| token.trim_matches('"'))
            .and_then(|token| MODES.decode(token));
        let range = parts
            .next()
            .and_then(|rest| rest.split(',').next())
            .and_then(decode_range);
        Ok(mode.zip(range))
    }

    async fn read(&mut self) -> Result<Option<f64>> {
        Ok(self.session.query_float("READ?").await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_tokens_decode_short_and_long_forms() {
        assert_eq!(MODES.decode("VOLT"), Some(MeterMode::DcVolt));
        assert_eq!(MODES.decode("VOLT:DC"), Some(MeterMode::DcVolt));
        assert_eq!(MODES.decode("VOLT:AC"), Some(MeterMode::AcVolt));
        assert_eq!(MODES.decode("FRES"), Some(MeterMode::Resistance));
        assert_eq!(MODES.decode("SENSOR"), None);
    }

    #[test]
    fn canonical_mode_tokens_round_trip() {
        for value in MODES.values().collect::<Vec<_>>() {
            let token = MODES.encode(value).unwrap();
            assert_eq!(MODES.decode(token), Some(value));
        }
    }

    #[test]
    fn discrete_range_validation() {
        assert!(Kt344xx::validate_discrete(
            MeterRange::Value(10.0),
            &VOLTAGE_RANGES,
            "volts range"
        )
        .is_ok());
        assert!(Kt344xx::validate_discrete(
            MeterRange::Value(42.0),
            &VOLTAGE_RANGES,
            "volts range"
        )
        .is_err());
        assert!(Kt344xx::validate_discrete(
            MeterRange::Auto,
            &VOLTAGE_RANGES,
            "volts range"
        )
        .is_ok());
    }

    #[test]
    fn frequency_span_rejects_auto() {
        assert!(
            Kt344xx::validate_span(MeterRange::Value(1000.0), FREQUENCY_SPAN, "frequency range")
                .is_ok()
        );
        assert!(
            Kt344xx::validate_span(MeterRange::Value(1.0), FREQUENCY_SPAN, "frequency range")
                .is_err()
        );
        assert!(
            Kt344xx::validate_span(MeterRange::Auto, FREQUENCY_SPAN, "frequency range").is_err()
        );
    }

    #[test]
    fn range_decoding() {
        assert_eq!(
            decode_range("+1.000000E+01"),
            Some(MeterRange::Value(10.0))
        );
        assert_eq!(decode_range("AUTO"), Some(MeterRange::Auto));
        assert_eq!(decode_range("DEF"), Some(MeterRange::Default));
        assert_eq!(decode_range("???"), None);
    }

    #[test]
    fn vendor_specs_share_the_dialect() {
        assert_eq!(KEYSIGHT_344XXA.usb_vid, 0x2A8D);
        assert_eq!(AGILENT_344XXA.usb_vid, 0x0957);
    }
}
