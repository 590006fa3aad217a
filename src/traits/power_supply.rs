//! Power supply capability contract and the shared output arbitration.

use crate::error::{BenchError, Result};
use crate::session::DeviceSession;
use crate::types::{CouplingMode, OutputState, StepDirection};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// The power supply capability contract.
///
/// Setpoint writes are range-checked on the client side before any wire
/// traffic: voltages against the caller-set safety voltage, currents against
/// the device maximum. Output switching goes through the arbitration rules of
/// [`plan_output`], identical across adapters.
#[async_trait]
pub trait PowerSupply: Send {
    fn channels(&self) -> usize;

    fn max_voltage(&self) -> f64;

    fn max_current(&self) -> f64;

    /// Whether the device can couple channels programmatically.
    fn supports_coupling(&self) -> bool;

    fn session(&self) -> &DeviceSession;

    fn session_mut(&mut self) -> &mut DeviceSession;

    fn check_channel(&self, channel: usize) -> Result<()> {
        BenchError::check_channel(channel, self.channels())
    }

    /// Upper bound for commanded voltages, `0 <= safety <= max_voltage`.
    /// Starts at zero: nothing can be commanded until the caller opts in.
    fn safety_voltage(&self) -> f64;
    fn set_safety_voltage(&mut self, voltage: f64) -> Result<()>;

    /// Extra settling delay inserted before measurement queries.
    fn measure_delay(&self) -> Duration;
    fn set_measure_delay(&mut self, delay: Duration);

    /// The recorded coupling mode. The setter warns and leaves the recorded
    /// mode unchanged when a device cannot couple programmatically; the
    /// request is still forwarded to the device hook.
    fn coupling_mode(&self) -> CouplingMode;
    async fn set_coupling_mode(&mut self, mode: CouplingMode) -> Result<()>;

    async fn volt_setpoint(&mut self, channel: usize) -> Result<Option<f64>>;
    /// Command a voltage setpoint; returns the recorded setpoint.
    async fn set_volt_setpoint(&mut self, channel: usize, voltage: f64) -> Result<f64>;

    /// Last voltage setpoint this session commanded. Soft state: stale if
    /// the instrument is operated manually.
    fn last_voltage_setpoint(&self) -> f64;

    async fn current_setpoint(&mut self, channel: usize) -> Result<Option<f64>>;
    async fn set_current_setpoint(&mut self, channel: usize, amps: f64) -> Result<f64>;

    fn last_current_setpoint(&self) -> f64;

    async fn measure_voltage(&mut self, channel: usize) -> Result<Option<f64>>;
    async fn measure_current(&mut self, channel: usize) -> Result<Option<f64>>;
    async fn measure_power(&mut self, channel: usize) -> Result<Option<f64>>;

    /// Per-channel output state. Devices without a query form answer from
    /// the last-commanded soft state, which is stale if the front panel was
    /// touched.
    async fn output(&mut self) -> Result<Vec<OutputState>>;

    /// Switch outputs. `channels` of `None` means every channel; `states`
    /// is broadcast when it holds a single entry, otherwise it must match
    /// `channels` in length. Arbitration per [`plan_output`].
    async fn set_output(
        &mut self,
        channels: Option<&[usize]>,
        states: &[OutputState],
    ) -> Result<()>;

    /// Put the device into a known safe state: independent coupling, all
    /// outputs off, setpoints zeroed.
    async fn initialize(&mut self) -> Result<()>;

    /// The step size used by [`PowerSupply::step_volts`].
    async fn step_increment(&mut self, channel: usize) -> Result<Option<f64>>;

    /// Configure the step size used by [`PowerSupply::step_volts`].
    async fn set_step_increment(&mut self, channel: usize, increment: f64) -> Result<()>;

    /// Step the voltage setpoint by the configured increment.
    async fn step_volts(&mut self, channel: usize, direction: StepDirection) -> Result<()>;
}

/// Shared coupling-mode arbitration: a device that cannot couple channels
/// programmatically keeps its recorded mode when asked for SERIES or
/// PARALLEL, with a warning. Returns the mode to record.
pub fn arbitrate_coupling(
    model: &str,
    supports_coupling: bool,
    recorded: CouplingMode,
    requested: CouplingMode,
) -> CouplingMode {
    if !supports_coupling
        && matches!(requested, CouplingMode::Series | CouplingMode::Parallel)
    {
        warn!("{model} : does not support coupling mode {requested:?} programmatically");
        recorded
    } else {
        requested
    }
}

/// Output switching plan produced by [`plan_output`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPlan {
    /// Channels to force off before any commanded channel (EXCLUSIVE mode).
    pub force_off: Vec<usize>,
    /// (channel, state) pairs to command, sorted by channel.
    pub commands: Vec<(usize, OutputState)>,
}

/// Arbitrate an output request against the coupling mode.
///
/// - Pairs are sorted by channel so command order is unambiguous.
/// - SERIES/PARALLEL require every requested state to be identical.
/// - EXCLUSIVE accepts a single channel only; commanding it ON forces every
///   other channel off first. Commanding OFF says nothing about the others.
///
/// # Errors
/// Contract errors for out-of-range channels, mismatched state counts, or
/// coupling rule violations -- all raised before any wire traffic.
pub fn plan_output(
    coupling: CouplingMode,
    num_channels: usize,
    channels: Option<&[usize]>,
    states: &[OutputState],
) -> Result<OutputPlan> {
    let channels: Vec<usize> = match channels {
        Some(list) => list.to_vec(),
        None => (1..=num_channels).collect(),
    };
    for &channel in &channels {
        BenchError::check_channel(channel, num_channels)?;
    }

    let states: Vec<OutputState> = if states.len() == 1 {
        vec![states[0]; channels.len()]
    } else if states.len() == channels.len() {
        states.to_vec()
    } else {
        return Err(BenchError::Contract(
            "number of states must be 1 or match the number of channels".into(),
        ));
    };

    let mut commands: Vec<(usize, OutputState)> = channels.into_iter().zip(states).collect();
    commands.sort_by_key(|(channel, _)| *channel);

    let mut force_off = Vec::new();
    match coupling {
        CouplingMode::Series | CouplingMode::Parallel => {
            if commands.windows(2).any(|pair| pair[0].1 != pair[1].1) {
                return Err(BenchError::Contract(
                    "states for SERIES or PARALLEL coupling must be the same for all channels"
                        .into(),
                ));
            }
        }
        CouplingMode::Exclusive => {
            if commands.len() > 1 {
                return Err(BenchError::Contract(
                    "only one channel may be commanded in EXCLUSIVE coupling".into(),
                ));
            }
            if let Some(&(channel, OutputState::On)) = commands.first() {
                force_off = (1..=num_channels).filter(|&c| c != channel).collect();
            }
        }
        CouplingMode::Independent => {}
    }

    Ok(OutputPlan { force_off, commands })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_single_state_to_all_channels() {
        let plan = plan_output(CouplingMode::Independent, 3, None, &[OutputState::Off]).unwrap();
        assert_eq!(
            plan.commands,
            vec![
                (1, OutputState::Off),
                (2, OutputState::Off),
                (3, OutputState::Off)
            ]
        );
        assert!(plan.force_off.is_empty());
    }

    #[test]
    fn commands_sorted_by_channel() {
        let plan = plan_output(
            CouplingMode::Independent,
            3,
            Some(&[3, 1]),
            &[OutputState::On, OutputState::Off],
        )
        .unwrap();
        assert_eq!(
            plan.commands,
            vec![(1, OutputState::Off), (3, OutputState::On)]
        );
    }

    #[test]
    fn out_of_range_channel_fails_before_planning() {
        assert!(plan_output(
            CouplingMode::Independent,
            2,
            Some(&[3]),
            &[OutputState::On]
        )
        .is_err());
    }

    #[test]
    fn state_count_must_match() {
        assert!(plan_output(
            CouplingMode::Independent,
            3,
            Some(&[1, 2, 3]),
            &[OutputState::On, OutputState::Off]
        )
        .is_err());
    }

    #[test]
    fn series_requires_identical_states() {
        let err = plan_output(
            CouplingMode::Series,
            2,
            Some(&[1, 2]),
            &[OutputState::On, OutputState::Off],
        );
        assert!(err.is_err());

        let ok = plan_output(CouplingMode::Parallel, 2, None, &[OutputState::On]);
        assert!(ok.is_ok());
    }

    #[test]
    fn exclusive_on_forces_others_off() {
        let plan = plan_output(
            CouplingMode::Exclusive,
            2,
            Some(&[2]),
            &[OutputState::On],
        )
        .unwrap();
        assert_eq!(plan.force_off, vec![1]);
        assert_eq!(plan.commands, vec![(2, OutputState::On)]);
    }

    #[test]
    fn exclusive_off_leaves_others_alone() {
        let plan = plan_output(
            CouplingMode::Exclusive,
            2,
            Some(&[2]),
            &[OutputState::Off],
        )
        .unwrap();
        assert!(plan.force_off.is_empty());
    }

    #[test]
    fn exclusive_rejects_multiple_channels() {
        assert!(plan_output(
            CouplingMode::Exclusive,
            2,
            Some(&[1, 2]),
            &[OutputState::On]
        )
        .is_err());
    }

    #[test]
    fn unsupported_coupling_keeps_recorded_mode() {
        let recorded = arbitrate_coupling(
            "HMC8042",
            false,
            CouplingMode::Independent,
            CouplingMode::Series,
        );
        assert_eq!(recorded, CouplingMode::Independent);

        let recorded = arbitrate_coupling(
            "SPD3303X",
            true,
            CouplingMode::Independent,
            CouplingMode::Series,
        );
        assert_eq!(recorded, CouplingMode::Series);

        // EXCLUSIVE is session-side policy: every device records it.
        let recorded = arbitrate_coupling(
            "HMC8042",
            false,
            CouplingMode::Independent,
            CouplingMode::Exclusive,
        );
        assert_eq!(recorded, CouplingMode::Exclusive);
    }
}
