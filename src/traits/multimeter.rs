//! Multimeter capability contract.

use crate::error::Result;
use crate::session::DeviceSession;
use crate::types::{MeterMode, MeterRange};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// The multimeter capability contract.
#[async_trait]
pub trait MultiMeter: Send {
    fn session(&self) -> &DeviceSession;

    fn session_mut(&mut self) -> &mut DeviceSession;

    /// Time allowed for a reading to settle in [`MultiMeter::read_until`].
    fn settling_delay(&self) -> Duration;
    fn set_settling_delay(&mut self, delay: Duration);

    /// Configure operating mode and range. Ranges are validated against the
    /// discrete values the mode accepts before any wire traffic.
    async fn set_mode_range(&mut self, range: MeterRange, mode: MeterMode) -> Result<()>;

    /// Current mode and range, decoded from the instrument configuration.
    async fn mode_range(&mut self) -> Result<Option<(MeterMode, MeterRange)>>;

    /// Take one reading. `None` when the instrument gave no answer.
    async fn read(&mut self) -> Result<Option<f64>>;

    /// Poll [`MultiMeter::read`] until a reading lands within
    /// `value ± tolerance` or the settling delay elapses. Returns whether a
    /// final confirming read is in band; a timeout is an answer, not an
    /// error.
    async fn read_until(&mut self, value: f64, tolerance: f64) -> Result<bool> {
        let in_band = |reading: Option<f64>| {
            reading.is_some_and(|r| (value - tolerance) <= r && r <= (value + tolerance))
        };

        let deadline = Instant::now() + self.settling_delay();
        loop {
            if in_band(self.read().await?) {
                break;
            }
            if Instant::now() > deadline {
                break;
            }
            tokio::task::yield_now().await;
        }
        Ok(in_band(self.read().await?))
    }
}
