//! Process-wide instrument enumerations.
//!
//! These are the abstract values spoken by the capability traits. Vendor
//! adapters translate them to and from wire tokens through their dialect
//! tables; nothing in this module knows any SCPI spelling.

/// Output channel switch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputState {
    Off,
    On,
}

/// How a multi-channel power supply switches its channels together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CouplingMode {
    /// Each channel is controlled independently.
    Independent,
    /// Channels switch together in a series connection.
    Series,
    /// Channels switch together in a parallel connection.
    Parallel,
    /// At most one channel on at a time; turning one on turns the others off.
    Exclusive,
}

/// Edge condition armed by an edge trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerEdge {
    Rising,
    Falling,
    Any,
}

/// Acquisition repetition policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSweep {
    /// Always display, trigger or not.
    Auto,
    /// Display on trigger, hold, repeat at each trigger.
    Normal,
    /// Wait for one trigger, display, stop.
    Single,
}

/// Observed state of the trigger subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerStatus {
    /// Trigger occurred or is occurring.
    Triggered,
    /// Waiting for a trigger.
    Waiting,
    /// Acquiring continuously without a trigger.
    Auto,
    /// Not acquiring (single sweep ends here).
    Stopped,
}

/// Vertical unit of a scope channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerticalUnit {
    Unknown,
    Volt,
    Watt,
    Amp,
}

/// Built-in scalar measurements a scope can take on a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    VMax,
    VMin,
    VPeakToPeak,
    VTop,
    /// 90% level, typically.
    VUpper,
    /// 50% level, typically.
    VMiddle,
    /// 10% level, typically.
    VLower,
    VBase,
    VAmplitude,
    VAverage,
    VRms,
    TimeVMax,
    TimeVMin,
    Overshoot,
    Preshoot,
    Area,
    PeriodArea,
    Period,
    Frequency,
    RiseTime,
    FallTime,
    /// Rise to fall.
    PositiveWidth,
    /// Fall to rise.
    NegativeWidth,
    PositiveDuty,
    NegativeDuty,
    PositiveSlew,
    NegativeSlew,
    Variance,
}

impl MeasurementKind {
    /// Every measurement kind, in declaration order.
    pub const ALL: [MeasurementKind; 28] = [
        MeasurementKind::VMax,
        MeasurementKind::VMin,
        MeasurementKind::VPeakToPeak,
        MeasurementKind::VTop,
        MeasurementKind::VUpper,
        MeasurementKind::VMiddle,
        MeasurementKind::VLower,
        MeasurementKind::VBase,
        MeasurementKind::VAmplitude,
        MeasurementKind::VAverage,
        MeasurementKind::VRms,
        MeasurementKind::TimeVMax,
        MeasurementKind::TimeVMin,
        MeasurementKind::Overshoot,
        MeasurementKind::Preshoot,
        MeasurementKind::Area,
        MeasurementKind::PeriodArea,
        MeasurementKind::Period,
        MeasurementKind::Frequency,
        MeasurementKind::RiseTime,
        MeasurementKind::FallTime,
        MeasurementKind::PositiveWidth,
        MeasurementKind::NegativeWidth,
        MeasurementKind::PositiveDuty,
        MeasurementKind::NegativeDuty,
        MeasurementKind::PositiveSlew,
        MeasurementKind::NegativeSlew,
        MeasurementKind::Variance,
    ];
}

/// Operator combining two channels into a derived math source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MathOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Or,
    Xor,
    Not,
    Fft,
    Integrate,
    Differentiate,
    Sqrt,
    Log10,
    Ln,
    Exp,
    Abs,
}

/// Waveform transfer encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataEncoding {
    Ascii,
    Int8,
    Int16Be,
    Int16Le,
    Uint8,
    Uint16Be,
    Uint16Le,
    Float32Be,
    Float32Le,
}

impl DataEncoding {
    /// Width of one sample in bytes, or `None` for the ASCII form.
    pub fn bytes_per_point(self) -> Option<usize> {
        match self {
            DataEncoding::Ascii => None,
            DataEncoding::Int8 | DataEncoding::Uint8 => Some(1),
            DataEncoding::Int16Be
            | DataEncoding::Int16Le
            | DataEncoding::Uint16Be
            | DataEncoding::Uint16Le => Some(2),
            DataEncoding::Float32Be | DataEncoding::Float32Le => Some(4),
        }
    }

    pub fn is_binary(self) -> bool {
        self.bytes_per_point().is_some()
    }
}

/// Operating modes of a bench multimeter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeterMode {
    DcVolt,
    DcAmp,
    AcVolt,
    AcAmp,
    Resistance,
    Frequency,
    Period,
}

/// Range selection for a multimeter mode: an explicit upper limit or one of
/// the symbolic selections the instruments accept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeterRange {
    Value(f64),
    Auto,
    Min,
    Max,
    Default,
}

/// Image formats supported for screen captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Tiff,
    Bmp,
}

impl ImageFormat {
    /// Infer the format from a filename extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<ImageFormat> {
        match ext.to_ascii_uppercase().as_str() {
            "PNG" => Some(ImageFormat::Png),
            "JPG" | "JPEG" => Some(ImageFormat::Jpeg),
            "TIF" | "TIFF" => Some(ImageFormat::Tiff),
            "BMP" => Some(ImageFormat::Bmp),
            _ => None,
        }
    }
}

/// Direction for stepped setpoint adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepDirection {
    Up,
    Down,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_measurement_kinds_enumerated() {
        assert_eq!(MeasurementKind::ALL.len(), 28);
    }

    #[test]
    fn encoding_widths() {
        assert_eq!(DataEncoding::Ascii.bytes_per_point(), None);
        assert_eq!(DataEncoding::Uint8.bytes_per_point(), Some(1));
        assert_eq!(DataEncoding::Int16Le.bytes_per_point(), Some(2));
        assert_eq!(DataEncoding::Float32Be.bytes_per_point(), Some(4));
        assert!(!DataEncoding::Ascii.is_binary());
        assert!(DataEncoding::Int8.is_binary());
    }

    #[test]
    fn image_format_from_extension() {
        assert_eq!(ImageFormat::from_extension("png"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_extension("JPG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("tiff"), Some(ImageFormat::Tiff));
        assert_eq!(ImageFormat::from_extension("svg"), None);
    }
}
