//! Capability contracts.
//!
//! Each trait is a stable operation contract one instrument class satisfies;
//! vendor adapters implement them through a [`crate::session::DeviceSession`]
//! and their dialect tables, never touching the transport directly. The
//! contracts are identical across vendors -- that is the point.

pub mod multimeter;
pub mod oscilloscope;
pub mod power_supply;

pub use multimeter::MultiMeter;
pub use oscilloscope::{
    EdgeTriggerSettings, MeasureRequest, MeasureSource, MeasurementResult, Oscilloscope,
};
pub use power_supply::{arbitrate_coupling, plan_output, OutputPlan, PowerSupply};
