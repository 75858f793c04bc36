//! Composite operations built from the motion ports: jog, sequences, cycles,
//! push operation and device parameter backup/restore.
//!
//! Every sequence aborts on the first failing step and returns its error.
//! A `stop()` from another thread cancels the step or dwell in progress.

use crate::ports::{MotionPort, ParameterPort, PositionPort};
use crate::signals::{DeviceParameter, Direction};
use ec_common::error::{ActuatorError, EcResult};
use ec_common::limits::MotionLimits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Jog in `direction`. With a `duration`, dwell and stop; a dwell cut short
/// by `stop()` still counts as success.
pub fn jog<P: MotionPort + ?Sized>(
    port: &P,
    direction: Direction,
    speed: Option<f64>,
    duration: Option<Duration>,
) -> EcResult<()> {
    port.jog_start(direction, speed)?;
    let Some(duration) = duration else {
        return Ok(());
    };

    let dwell = port.pause(duration);
    port.stop();
    match dwell {
        Err(ActuatorError::Cancelled { .. }) => {
            info!(%direction, "Jog stopped early");
            Ok(())
        }
        other => other,
    }
}

/// Move through `targets` in order, dwelling between steps.
pub fn move_sequence<P: PositionPort + ?Sized>(
    port: &P,
    targets: &[f64],
    speed: Option<f64>,
    dwell: Duration,
) -> EcResult<()> {
    info!(steps = targets.len(), "Starting move sequence");
    for (step, &target) in targets.iter().enumerate() {
        if step > 0 {
            port.pause(dwell)?;
        }
        info!(step = step + 1, total = targets.len(), target, "Sequence step");
        port.move_to_position(target, speed).map_err(|e| {
            warn!(step = step + 1, error = %e, "Move sequence aborted");
            e
        })?;
    }
    info!("Move sequence complete");
    Ok(())
}

/// Drive to each end in turn, dwelling after each step.
pub fn end_sequence<P: MotionPort + ?Sized>(
    port: &P,
    steps: &[(Direction, Duration)],
) -> EcResult<()> {
    info!(steps = steps.len(), "Starting end-stop sequence");
    for (step, &(direction, dwell)) in steps.iter().enumerate() {
        info!(step = step + 1, total = steps.len(), %direction, "Sequence step");
        port.move_to_end(direction).map_err(|e| {
            warn!(step = step + 1, error = %e, "End-stop sequence aborted");
            e
        })?;
        port.pause(dwell)?;
    }
    info!("End-stop sequence complete");
    Ok(())
}

/// Run `cycles` forward/backward round trips with a dwell at each end.
pub fn cycle_motion<P: MotionPort + ?Sized>(port: &P, cycles: u32, dwell: Duration) -> EcResult<()> {
    info!(cycles, "Starting cycle motion");
    for cycle in 1..=cycles {
        for direction in [Direction::Forward, Direction::Backward] {
            port.move_to_end(direction).map_err(|e| {
                warn!(cycle, %direction, error = %e, "Cycle motion aborted");
                e
            })?;
            port.pause(dwell)?;
        }
        info!(cycle, cycles, "Cycle complete");
    }
    Ok(())
}

/// Push operation: arm push mode, approach `position` and disarm.
///
/// Arguments are validated before any write. Push mode is disarmed on
/// every path once it may have been armed.
pub fn push_operation<P: PositionPort + ?Sized>(
    port: &P,
    position: f64,
    force: u8,
    approach_speed: f64,
) -> EcResult<()> {
    MotionLimits::check_push_force(force)?;
    port.validate_move(position, Some(approach_speed))?;
    info!(position, force, approach_speed, "Starting push operation");

    let outcome = port
        .arm_push(force, position)
        .and_then(|()| port.move_to_position(position, Some(approach_speed)));
    let disarmed = port.disarm_push();
    if let Err(e) = &disarmed {
        warn!(error = %e, "Failed to disable push mode");
    }
    outcome.and(disarmed)
}

/// Device parameter backup file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBackup {
    /// Model the backup was taken from.
    pub controller_model: String,
    /// RFC 3339 capture time.
    pub backup_time: String,
    /// Parameter values by name.
    pub parameters: BTreeMap<String, f64>,
}

fn io_error(path: &Path, e: impl std::fmt::Display) -> ActuatorError {
    ActuatorError::Io(format!("{}: {e}", path.display()))
}

/// Read every device parameter and save them to `path` as TOML.
/// Unreadable parameters are skipped.
pub fn backup_parameters<P: ParameterPort + ?Sized>(port: &P, path: &Path) -> EcResult<ParameterBackup> {
    let mut parameters = BTreeMap::new();
    for parameter in DeviceParameter::ALL {
        match port.read_device_parameter(parameter) {
            Ok(value) => {
                parameters.insert(parameter.name().to_string(), value);
            }
            Err(e) => warn!(%parameter, error = %e, "Skipping unreadable parameter"),
        }
    }

    let backup = ParameterBackup {
        controller_model: port.model().to_string(),
        backup_time: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
        parameters,
    };
    let text = toml::to_string_pretty(&backup).map_err(|e| io_error(path, e))?;
    fs::write(path, text).map_err(|e| io_error(path, e))?;

    info!(path = %path.display(), count = backup.parameters.len(), "Parameters backed up");
    Ok(backup)
}

/// Write every parameter in the backup at `path`.
///
/// All entries are attempted; the first failure is returned after the rest
/// have been written. Returns the number of parameters restored.
pub fn restore_parameters<P: ParameterPort + ?Sized>(port: &P, path: &Path) -> EcResult<usize> {
    let text = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let backup: ParameterBackup = toml::from_str(&text).map_err(|e| io_error(path, e))?;

    if backup.controller_model != port.model() {
        warn!(
            backup = %backup.controller_model,
            controller = port.model(),
            "Backup was taken from a different model"
        );
    }

    let mut restored = 0;
    let mut first_error = None;
    for (name, &value) in &backup.parameters {
        let result = DeviceParameter::from_name(name)
            .ok_or_else(|| ActuatorError::InvalidArgument(format!("unknown parameter {name}")))
            .and_then(|parameter| port.write_device_parameter(parameter, value));
        match result {
            Ok(()) => restored += 1,
            Err(e) => {
                warn!(parameter = %name, error = %e, "Parameter not restored");
                first_error.get_or_insert(e);
            }
        }
    }

    info!(restored, total = backup.parameters.len(), "Parameter restore finished");
    match first_error {
        Some(e) => Err(e),
        None => Ok(restored),
    }
}
