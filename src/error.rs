//! Error types for the crate.
//!
//! `BenchError` is the single error enum surfaced by sessions, capability
//! traits, and vendor adapters. The split follows the propagation policy of
//! the protocol layer:
//!
//! - **`Lookup`** / **`Connection`**: construction-time failures. `Lookup`
//!   means no resource matched the requested vendor/product/serial;
//!   `Connection` means a matched resource refused to open or identify.
//! - **`ChannelOutOfRange`** / **`ValueOutOfRange`** / **`Contract`**: caller
//!   bugs. These are raised before any wire traffic is generated.
//! - **`NotSupported`**: the capability operation has no implementation on
//!   this adapter.
//! - **`FileType`**: unrecognized screen-capture file extension.
//! - **`Waveform`**: malformed preamble or payload framing.
//! - **`Transport`** / **`Io`**: wrapped lower-layer failures.
//!
//! Soft failures -- a transaction that simply gets no answer, or a poll that
//! runs out its deadline -- are deliberately *not* errors. They surface as
//! `None`, NaN, or a last-observed value so that long scripted sequences
//! survive one flaky transaction.

use crate::hardware::TransportError;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("no resource matches {0}")]
    Lookup(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("channel {channel} out of range: must be 1 through {max}")]
    ChannelOutOfRange { channel: usize, max: usize },

    #[error("{name} out of range: {value} must be between {min} and {max}")]
    ValueOutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{0}")]
    Contract(String),

    #[error("operation not supported by {0}")]
    NotSupported(&'static str),

    #[error("unsupported file type: {0}")]
    FileType(String),

    #[error("waveform decode error: {0}")]
    Waveform(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Range check shared by every capability adapter: channels are 1-based
    /// and bounded by the device's fixed channel count.
    pub fn check_channel(channel: usize, max: usize) -> Result<()> {
        if channel < 1 || channel > max {
            return Err(BenchError::ChannelOutOfRange { channel, max });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_check_bounds() {
        assert!(BenchError::check_channel(1, 4).is_ok());
        assert!(BenchError::check_channel(4, 4).is_ok());
        assert!(BenchError::check_channel(0, 4).is_err());
        assert!(BenchError::check_channel(5, 4).is_err());
    }

    #[test]
    fn error_display() {
        let err = BenchError::ChannelOutOfRange { channel: 5, max: 4 };
        assert_eq!(
            err.to_string(),
            "channel 5 out of range: must be 1 through 4"
        );

        let err = BenchError::ValueOutOfRange {
            name: "voltage",
            value: 40.0,
            min: 0.0,
            max: 32.0,
        };
        assert!(err.to_string().contains("voltage out of range"));
    }
}
