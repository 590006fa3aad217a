//! Rohde & Schwarz HMC804x bench power supplies.
//!
//! One adapter covers the HMC8041/8042/8043 through a product spec (channel
//! count and per-model current limit). The protocol is select-then-act:
//! `INSTrument OUT<n>` picks the channel every subsequent command applies
//! to. Channels cannot be coupled programmatically; besides the per-channel
//! switches there is a master output line that gates them all.

use crate::dialect::DialectTable;
use crate::error::{BenchError, Result};
use crate::hardware::{ResourceSelector, TransportOpener};
use crate::session::{DeviceSession, SessionBuilder};
use crate::traits::power_supply::{arbitrate_coupling, plan_output, PowerSupply};
use crate::types::{CouplingMode, OutputState, StepDirection};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::time::Duration;
use tracing::warn;

pub const USB_VID: u16 = 0x0AAD;

const MAX_VOLTAGE: f64 = 32.05;
/// Smallest current limit the device accepts; lower requests are clamped
/// silently.
const MIN_CURRENT: f64 = 0.005;

/// Product constants separating the members of this family.
#[derive(Debug, Clone, Copy)]
pub struct Hmc804xSpec {
    pub model: &'static str,
    pub usb_pid: u16,
    pub channels: usize,
    pub max_current: f64,
}

pub const HMC8041: Hmc804xSpec = Hmc804xSpec {
    model: "HMC8041",
    usb_pid: 0x0002,
    channels: 1,
    max_current: 10.0,
};

pub const HMC8042: Hmc804xSpec = Hmc804xSpec {
    model: "HMC8042",
    usb_pid: 0x0135,
    channels: 2,
    max_current: 5.0,
};

pub const HMC8043: Hmc804xSpec = Hmc804xSpec {
    model: "HMC8043",
    usb_pid: 0x0002,
    channels: 3,
    max_current: 3.0,
};

static OUTPUT_STATES: Lazy<DialectTable<OutputState>> = Lazy::new(|| {
    DialectTable::new()
        .entry(OutputState::Off, "OFF", &["0"])
        .entry(OutputState::On, "ON", &["1"])
});

/// R&S HMC804x bench power supply.
pub struct Hmc804x {
    session: DeviceSession,
    spec: Hmc804xSpec,
    coupling: CouplingMode,
    /// Last-commanded activation per channel. The device has a query form;
    /// this mirror exists for debug and master-line arbitration and is stale
    /// if the front panel is used.
    state: Vec<OutputState>,
    safety_voltage: f64,
    measure_delay: Duration,
    last_voltage_setpoint: f64,
    last_current_setpoint: f64,
}

impl Hmc804x {
    pub fn new(session: DeviceSession, spec: Hmc804xSpec) -> Self {
        Self {
            session,
            spec,
            coupling: CouplingMode::Independent,
            state: vec![OutputState::Off; spec.channels],
            safety_voltage: 0.0,
            // Empirically found settling time.
            measure_delay: Duration::from_millis(250),
            last_voltage_setpoint: 0.0,
            last_current_setpoint: 0.0,
        }
    }

    pub async fn connect(
        opener: &dyn TransportOpener,
        spec: Hmc804xSpec,
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

    pub async fn close(&mut self) {
        self.session.close().await;
    }

    async fn select(&mut self, channel: usize) -> Result<()> {
        self.session
            .command(&format!("INSTrument OUT{channel}"))
            .await
    }

    /// Reconcile the recorded current setpoint with the device: it lowers
    /// the limit on its own when the voltage setting demands it.
    async fn reconcile_current_setpoint(&mut self) {
        if let Some(readback) = self.session.query_float("CURRent?").await {
            if readback.is_finite() && self.last_current_setpoint > readback {
                self.last_current_setpoint = readback;
                warn!("current setpoint was automatically adjusted to {readback} A by device");
            }
        }
    }
}

#[async_trait]
impl PowerSupply for Hmc804x {
    fn channels(&self) -> usize {
        self.spec.channels
    }

    fn max_voltage(&self) -> f64 {
        MAX_VOLTAGE
    }

    fn max_current(&self) -> f64 {
        self.spec.max_current
    }

    fn supports_coupling(&self) -> bool {
        false
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
        // Nothing to command: the device only has independent channels.
        // SERIES/PARALLEL are refused with a warning; EXCLUSIVE is session
        // policy and needs no device support.
        self.coupling = arbitrate_coupling(self.spec.model, false, self.coupling, mode);
        Ok(())
    }

    async fn volt_setpoint(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        self.select(channel).await?;
        Ok(self.session.query_float("VOLTage?").await)
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
        self.select(channel).await?;
        self.session
            .command(&format!("VOLTage {voltage}"))
            .await?;
        self.last_voltage_setpoint = voltage;

        // The device may trim the current limit to fit the new voltage.
        self.reconcile_current_setpoint().await;
        Ok(self.last_voltage_setpoint)
    }

    fn last_voltage_setpoint(&self) -> f64 {
        self.last_voltage_setpoint
    }

    async fn current_setpoint(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        self.select(channel).await?;
        Ok(self.session.query_float("CURRent?").await)
    }

    async fn set_current_setpoint(&mut self, channel: usize, amps: f64) -> Result<f64> {
        self.check_channel(channel)?;
        if amps < 0.0 || amps > self.spec.max_current {
            return Err(BenchError::ValueOutOfRange {
                name: "amps",
                value: amps,
                min: 0.0,
                max: self.spec.max_current,
            });
        }
        let amps = amps.max(MIN_CURRENT);
        self.select(channel).await?;
        self.session.command(&format!("CURRent {amps}")).await?;
        self.last_current_setpoint = amps;

        self.reconcile_current_setpoint().await;
        Ok(self.last_current_setpoint)
    }

    fn last_current_setpoint(&self) -> f64 {
        self.last_current_setpoint
    }

    async fn measure_voltage(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        tokio::time::sleep(self.measure_delay).await;
        self.select(channel).await?;
        // NaN from the meter means the channel is disabled.
        Ok(self
            .session
            .query_float("MEASure:VOLTage?")
            .await
            .map(|v| if v.is_nan() { 0.0 } else { v }))
    }

    async fn measure_current(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        tokio::time::sleep(self.measure_delay).await;
        self.select(channel).await?;
        Ok(self
            .session
            .query_float("MEASure:CURRent?")
            .await
            .map(|v| if v.is_nan() { 0.0 } else { v }))
    }

    async fn measure_power(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        tokio::time::sleep(self.measure_delay).await;
        self.select(channel).await?;
        Ok(self
            .session
            .query_float("MEASure:POWer?")
            .await
            .map(|v| if v.is_nan() { 0.0 } else { v }))
    }

    async fn output(&mut self) -> Result<Vec<OutputState>> {
        // Two switch layers: per-channel activation and the master line. A
        // channel is only live when both agree; the soft state tracks the
        // activations and the comparison below surfaces manual tampering.
        let general = self
            .session
            .query("OUTput:GENeral?")
            .await
            .and_then(|token| OUTPUT_STATES.decode(&token));

        for channel in 1..=self.spec.channels {
            self.select(channel).await?;
            if let Some(state) = self
                .session
                .query("OUTPut:SELect?")
                .await
                .and_then(|token| OUTPUT_STATES.decode(&token))
            {
                self.state[channel - 1] = state;
            }
        }

        let all_off = self.state.iter().all(|s| *s == OutputState::Off);
        if all_off && general == Some(OutputState::On) {
            warn!(
                "general output is ON but all channels appear deactivated \
                 (suspect buttons have been manually changed)"
            );
        } else if !all_off && general == Some(OutputState::Off) {
            warn!(
                "general output is OFF but some channels are active \
                 (suspect buttons have been manually changed)"
            );
        }

        Ok(self.state.clone())
    }

    async fn set_output(
        &mut self,
        channels: Option<&[usize]>,
        states: &[OutputState],
    ) -> Result<()> {
        let plan = plan_output(self.coupling, self.spec.channels, channels, states)?;

        for channel in plan.force_off {
            self.select(channel).await?;
            self.session.command("OUTPut:CHANnel OFF").await?;
            self.state[channel - 1] = OutputState::Off;
        }

        for (channel, state) in plan.commands {
            self.state[channel - 1] = state;
            self.select(channel).await?;
            let token = OUTPUT_STATES.encode(state)?;
            self.session
                .command(&format!("OUTPut:CHANnel {token}"))
                .await?;
        }

        // The master line gates every activation: all-off drops it, any
        // active channel raises it.
        if self.state.iter().all(|s| *s == OutputState::Off) {
            self.session.command("OUTPut:MASTer:STATe OFF").await
        } else {
            self.session.command("OUTPut:MASTer:STATe ON").await
        }
    }

    async fn initialize(&mut self) -> Result<()> {
        // Reset without waiting for re-identification.
        self.session.reset(Duration::ZERO).await;
        self.set_coupling_mode(CouplingMode::Independent).await?;
        self.set_output(None, &[OutputState::Off]).await?;
        for channel in 1..=self.spec.channels {
            self.set_volt_setpoint(channel, 0.0).await?;
            self.set_current_setpoint(channel, 0.0).await?;
        }
        Ok(())
    }

    async fn step_increment(&mut self, channel: usize) -> Result<Option<f64>> {
        self.check_channel(channel)?;
        self.select(channel).await?;
        Ok(self.session.query_float("VOLTage:STEP?").await)
    }

    async fn set_step_increment(&mut self, channel: usize, increment: f64) -> Result<()> {
        self.check_channel(channel)?;
        if !(0.001..=5.0).contains(&increment) {
            return Err(BenchError::ValueOutOfRange {
                name: "increment",
                value: increment,
                min: 0.001,
                max: 5.0,
            });
        }
        self.select(channel).await?;
        self.session
            .command(&format!("VOLTage:STEP {increment}"))
            .await
    }

    async fn step_volts(&mut self, channel: usize, direction: StepDirection) -> Result<()> {
        self.check_channel(channel)?;
        self.select(channel).await?;
        let token = match direction {
            StepDirection::Up => "UP",
            StepDirection::Down => "DOWN",
        };
        self.session.command(&format!("VOLTage {token}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_state_tokens_round_trip() {
        for value in OUTPUT_STATES.values().collect::<Vec<_>>() {
            let token = OUTPUT_STATES.encode(value).unwrap();
            assert_eq!(OUTPUT_STATES.decode(token), Some(value));
        }
        assert_eq!(OUTPUT_STATES.decode("1"), Some(OutputState::On));
        assert_eq!(OUTPUT_STATES.decode("0"), Some(OutputState::Off));
    }

    #[test]
    fn product_specs_cover_channel_counts() {
        assert_eq!(HMC8041.channels, 1);
        assert_eq!(HMC8042.channels, 2);
        assert_eq!(HMC8043.channels, 3);
        assert!(HMC8041.max_current > HMC8042.max_current);
    }
}
