//! Bench instrument control over SCPI.
//!
//! A hardware-abstraction layer for bench test instruments -- oscilloscopes,
//! power supplies, and multimeters -- speaking the SCPI request/response
//! protocol over a half-duplex transport:
//!
//! - [`session`]: the paced protocol session (command/query/typed query,
//!   identification, reset)
//! - [`traits`]: the capability contracts vendor adapters implement
//! - [`dialect`]: per-vendor enum/wire-token codecs
//! - [`waveform`]: chunked binary/ASCII waveform transfer decoding
//! - [`instruments`]: the vendor adapters
//! - [`hardware`]: the transport seam (VISA-backed or mock)
//!
//! # Features
//!
//! - `instrument_visa` -- enable the VISA-backed transport (`visa-rs`). Off
//!   by default; the mock transport always builds.
//!
//! # Example
//!
//! ```no_run
//! use benchtop::hardware::{MockOpener, MockTransport};
//! use benchtop::instruments::Ds1000z;
//! use benchtop::traits::Oscilloscope;
//! use benchtop::types::TriggerSweep;
//!
//! # async fn example() -> benchtop::error::Result<()> {
//! let opener = MockOpener::new(MockTransport::identified(
//!     "RIGOL TECHNOLOGIES,DS1054Z,DS1ZA0001,00.04.04",
//! ));
//! let mut scope = Ds1000z::connect(&opener, None, None).await?;
//! scope.run(TriggerSweep::Single).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dialect;
pub mod error;
pub mod hardware;
pub mod instruments;
pub mod session;
pub mod traits;
pub mod types;
pub mod waveform;

// Re-exports for convenience
pub use error::{BenchError, Result};
pub use session::{DeviceIdentity, DeviceSession, SessionBuilder};
pub use traits::{MultiMeter, Oscilloscope, PowerSupply};
pub use types::{
    CouplingMode, DataEncoding, MathOperator, MeasurementKind, OutputState, TriggerEdge,
    TriggerStatus, TriggerSweep,
};
pub use waveform::{WaveSource, WaveformData, WaveformPreamble};
