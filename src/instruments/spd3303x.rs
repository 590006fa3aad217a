//! Siglent SPD3303X / SPD3303X-E bench power supplies.
//!
//! Two channels with programmatic series/parallel tracking. The instrument
//! has no query form for its output switches, so the adapter keeps a
//! last-commanded soft state -- stale if anyone touches the front panel.

use crate::error::{BenchError, Result};
use crate::hardware::{ResourceSelector, TransportOpener};
use crate::session::{DeviceSession, SessionBuilder};
use crate::traits::power_supply::{arbitrate_coupling, plan_output, PowerSupply};
use crate::types::{CouplingMode, OutputState, StepDirection};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

pub const USB_VID: u16 = 0x0483;
pub const USB_PID: u16 = 0x7540;

const NUM_CHANNELS: usize = 2;
const MAX_VOLTAGE: f64 = 32.0;
const MAX_CURRENT: f64 = 3.2;
/// Settling time before measurement queries; readings drift for a beat
/// after a setpoint change.
const MEASURE_DELAY: Duration = Duration::from_millis(200);

fn track_code(mode: CouplingMode) -> u8 {
    match mode {
        CouplingMode::Independent | CouplingMode::Exclusive => 0,
        CouplingMode::Series => 1,
        CouplingMode::Parallel => 2,
    }
}

fn state_token(state: OutputState) -> &'static str {
    match state {
        OutputState::On => "ON",
        OutputState::Off => "OFF",
    }
}

/// Siglent SPD3303X bench power supply.
pub struct Spd3303x {
    session: DeviceSession,
    coupling: CouplingMode,
    /// Last-commanded switch state per channel; no query form exists.
    state: [OutputState; NUM_CHANNELS],
    safety_voltage: f64,
    measure_delay: Duration,
    last_voltage_setpoint: f64,
    last_current_setpoint: f64,
    step: f64,
}

impl Spd3303x {
    pub fn new(session: DeviceSession) -> Self {
        Self {
            session,
            coupling: CouplingMode::Independent,
            state: [OutputState::Off; NUM_CHANNELS],
            safety_voltage: 0.0,
            measure_delay: MEASURE_DELAY,
            last_voltage_setpoint: 0.0,
            last_current_setpoint: 0.0,
            step: 0.0,
        }
    }

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

    /// Return the supply to a safe state and release the transport.
    pub async fn close(&mut self) {
        if let Err(err) = self.initialize().await {
            warn!("shutdown initialize failed: {err}");
        }
        self.session.close().await;
    }
}

#[async_trait]
impl PowerSupply for Spd3303x {
    fn channels(&self) -> usize {
        NUM_CHANNELS
    }

    fn max_voltage(&self) -> f64 {
        MAX_VOLTAGE
    }

    fn max_current(&self) -> f64 {
        MAX_CURRENT
    }

    fn supports_coupling(&self) -> bool {
        true
    }

    fn session(&self) -> &DeviceSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut DeviceSession {
        &mut self.session
    }

    fn safety_voltage(&self) -> f64 {
        self.safety_voltage
    }

    fn set_safety_voltage(&mut self, voltage: f64) -> Result<()> {
        if !(0.0..=MAX_VOLTAGE).contains(&voltage) {
            return Err(BenchError::ValueOutOfRange {
                name: "safety_voltage",
                value: voltage,
                min: 0.0,
                max: MAX_VOLTAGE,
            });
        }
        self.safety_voltage = voltage;
        Ok(())
    }

    fn measure_delay(&self) -> Duration {
        self.measure_delay
    }

    fn set_measure_delay(&mut self, delay: Duration) {
        self.measure_delay = delay;
    }

    fn coupling_mode(&self) -> CouplingMode {
        self.coupling
    }

    async fn set_coupling_mode(&mut self, mode: CouplingMode) -> Result<()> {
        self.coupling = arbitrate_coupling("SPD3303X", true, self.coupling, mode);
        self.session
            .command(&format!("OUTPut:TRACK {}", track_code(mode)))
            .await
    }

    async fn volt_setpoint(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        Ok(self
            .session
            .query_float(&format!("CH{channel}:VOLTage?"))
            .await)
    }

    async fn set_volt_setpoint(&mut self, channel: usize, voltage: f64) -> Result<f64> {
        self.check_channel(channel)?;
        if voltage < 0.0 || voltage > self.safety_voltage {
            return Err(BenchError::ValueOutOfRange {
                name: "voltage",
                value: voltage,
                min: 0.0,
                max: self.safety_voltage,
            });
        }
        self.session
            .command(&format!("CH{channel}:VOLTage {voltage}"))
            .await?;
        self.last_voltage_setpoint = voltage;
        Ok(self.last_voltage_setpoint)
    }

    fn last_voltage_setpoint(&self) -> f64 {
        self.last_voltage_setpoint
    }

    async fn current_setpoint(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        Ok(self
            .session
            .query_float(&format!("CH{channel}:CURRent?"))
            .await)
    }

    async fn set_current_setpoint(&mut self, channel: usize, amps: f64) -> Result<f64> {
        self.check_channel(channel)?;
        if !(0.0..=MAX_CURRENT).contains(&amps) {
            return Err(BenchError::ValueOutOfRange {
                name: "amps",
                value: amps,
                min: 0.0,
                max: MAX_CURRENT,
            });
        }
        self.session
            .command(&format!("CH{channel}:CURRent {amps}"))
            .await?;
        self.last_current_setpoint = amps;
        Ok(self.last_current_setpoint)
    }

    fn last_current_setpoint(&self) -> f64 {
        self.last_current_setpoint
    }

    async fn measure_voltage(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        tokio::time::sleep(self.measure_delay).await;
        Ok(self
            .session
            .query_float(&format!("MEASure:VOLTage? CH{channel}"))
            .await)
    }

    async fn measure_current(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        tokio::time::sleep(self.measure_delay).await;
        Ok(self
            .session
            .query_float(&format!("MEASure:CURRent? CH{channel}"))
            .await)
    }

    async fn measure_power(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        tokio::time::sleep(self.measure_delay).await;
        Ok(self
            .session
            .query_float(&format!("MEASure:POWEr? CH{channel}"))
            .await)
    }

    async fn output(&mut self) -> Result<Vec<OutputState>> {
        Ok(self.state.to_vec())
    }

    async fn set_output(
        &mut self,
        channels: Option<&[usize]>,
        states: &[OutputState],
    ) -> Result<()> {
        let plan = plan_output(self.coupling, NUM_CHANNELS, channels, states)?;

        for channel in plan.force_off {
            self.session
                .command(&format!("OUTPut CH{channel},OFF"))
                .await?;
            self.state[channel - 1] = OutputState::Off;
        }

        let coupled = matches!(
            self.coupling,
            CouplingMode::Series | CouplingMode::Parallel
        );
        for (channel, state) in plan.commands {
            self.state[channel - 1] = state;
            // In series and parallel tracking the device couples the pair
            // through channel 1's switch.
            if channel == 1 || !coupled {
                self.session
                    .command(&format!("OUTPut CH{channel},{}", state_token(state)))
                    .await?;
            }
        }
        Ok(())
    }

    async fn initialize(&mut self) -> Result<()> {
        // No *RST support on this device; a safe state is commanded
        // piecewise instead.
        self.set_coupling_mode(CouplingMode::Independent).await?;
        self.set_output(None, &[OutputState::Off]).await?;
        for channel in 1..=NUM_CHANNELS {
            self.set_volt_setpoint(channel, 0.0).await?;
            self.set_current_setpoint(channel, 0.0).await?;
        }
        Ok(())
    }

    async fn step_increment(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        self.session
            .command(&format!("INSTrument CH{channel}"))
            .await?;
        Ok(Some(self.step))
    }

    async fn set_step_increment(&mut self, channel: usize, increment: f64) -> Result<()> {
        self.check_channel(channel)?;
        self.session
            .command(&format!("INSTrument CH{channel}"))
            .await?;
        if !(0.001..=5.0).contains(&increment) {
            return Err(BenchError::ValueOutOfRange {
                name: "increment",
                value: increment,
                min: 0.001,
                max: 5.0,
            });
        }
        // No step register on this device; the increment is session state.
        self.step = increment;
        Ok(())
    }

    async fn step_volts(&mut self, channel: usize, direction: StepDirection) -> Result<()> {
        self.check_channel(channel)?;
        let step = match direction {
            StepDirection::Up => self.step,
            StepDirection::Down => -self.step,
        };
        match self.volt_setpoint(channel).await? {
            Some(setpoint) if setpoint.is_finite() => {
                self.set_volt_setpoint(channel, setpoint + step).await?;
            }
            _ => warn!("cannot step channel {channel}: setpoint unreadable"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_codes_match_the_manual() {
        assert_eq!(track_code(CouplingMode::Independent), 0);
        assert_eq!(track_code(CouplingMode::Series), 1);
        assert_eq!(track_code(CouplingMode::Parallel), 2);
        // EXCLUSIVE is arbitration policy, not a tracking mode.
        assert_eq!(track_code(CouplingMode::Exclusive), 0);
    }
}
