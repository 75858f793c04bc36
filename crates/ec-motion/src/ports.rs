//! Capability traits consumed by the command layer and the CLI.
//!
//! The command layer is written against these traits instead of a concrete
//! actuator so that sequences run the same way on any backend.

use crate::actuator::Actuator;
use crate::io::{AxisIo, PositionIo};
use crate::signals::{DeviceParameter, Direction};
use crate::status::{AlarmRecord, StatusReport};
use ec_common::error::EcResult;
use std::time::Duration;
use tracing::{info, warn};

/// Motion available on every axis.
pub trait MotionPort: Send + Sync {
    /// Run the home sequence with the configured timeout.
    fn home(&self) -> EcResult<()>;

    /// Drive to an end with the configured timeout.
    fn move_to_end(&self, direction: Direction) -> EcResult<()>;

    /// Start jogging; returns while the axis is still moving.
    fn jog_start(&self, direction: Direction, speed: Option<f64>) -> EcResult<()>;

    /// Stop motion and cancel blocked waits. Never fails.
    fn stop(&self);

    /// Pulse the alarm reset.
    fn reset_alarm(&self) -> EcResult<()>;

    /// Alarm status; unreadable counts as no alarm.
    fn is_alarmed(&self) -> bool;

    /// Dwell unless stopped.
    fn pause(&self, duration: Duration) -> EcResult<()>;
}

/// Absolute positioning and push operation.
pub trait PositionPort: MotionPort {
    /// Check a move's arguments without touching the controller.
    fn validate_move(&self, position: f64, speed: Option<f64>) -> EcResult<()>;

    /// Move to an absolute position with the configured timeout.
    fn move_to_position(&self, position: f64, speed: Option<f64>) -> EcResult<()>;

    /// Current position in degrees.
    fn current_position(&self) -> EcResult<f64>;

    /// Write push force and position and enable push mode.
    fn arm_push(&self, force: u8, position: f64) -> EcResult<()>;

    /// Disable push mode.
    fn disarm_push(&self) -> EcResult<()>;
}

/// Device configuration parameter access.
pub trait ParameterPort {
    /// Controller model identifier.
    fn model(&self) -> &str;

    /// Read one device parameter.
    fn read_device_parameter(&self, parameter: DeviceParameter) -> EcResult<f64>;

    /// Validate and write one device parameter. Takes effect after restart.
    fn write_device_parameter(&self, parameter: DeviceParameter, value: f64) -> EcResult<()>;
}

/// Status reporting.
pub trait StatusPort: Send + Sync {
    /// Snapshot type produced by this source.
    type Snapshot: StatusReport + Send + 'static;

    /// Read a full status snapshot.
    fn snapshot(&self) -> EcResult<Self::Snapshot>;

    /// Alarm history, newest first. Empty when the source keeps none.
    fn alarm_history(&self) -> EcResult<Vec<AlarmRecord>> {
        Ok(Vec::new())
    }
}

impl<IO: AxisIo> MotionPort for Actuator<IO> {
    fn home(&self) -> EcResult<()> {
        Actuator::home(self, None)
    }

    fn move_to_end(&self, direction: Direction) -> EcResult<()> {
        Actuator::move_to_end(self, direction, None)
    }

    fn jog_start(&self, direction: Direction, speed: Option<f64>) -> EcResult<()> {
        Actuator::jog_start(self, direction, speed)
    }

    fn stop(&self) {
        Actuator::stop(self);
    }

    fn reset_alarm(&self) -> EcResult<()> {
        Actuator::reset_alarm(self)
    }

    fn is_alarmed(&self) -> bool {
        Actuator::is_alarmed(self)
    }

    fn pause(&self, duration: Duration) -> EcResult<()> {
        Actuator::pause(self, duration)
    }
}

impl<IO: PositionIo> PositionPort for Actuator<IO> {
    fn validate_move(&self, position: f64, speed: Option<f64>) -> EcResult<()> {
        Actuator::validate_move(self, position, speed, None)
    }

    fn move_to_position(&self, position: f64, speed: Option<f64>) -> EcResult<()> {
        Actuator::move_to_position(self, position, speed, None, None)
    }

    fn current_position(&self) -> EcResult<f64> {
        Actuator::current_position(self)
    }

    fn arm_push(&self, force: u8, position: f64) -> EcResult<()> {
        Actuator::arm_push(self, force, position)
    }

    fn disarm_push(&self) -> EcResult<()> {
        Actuator::disarm_push(self)
    }
}

impl<IO: PositionIo> ParameterPort for Actuator<IO> {
    fn model(&self) -> &str {
        Actuator::model(self)
    }

    fn read_device_parameter(&self, parameter: DeviceParameter) -> EcResult<f64> {
        self.io()
            .transport()
            .read_f64(&self.io().tags().device_parameter(parameter))
    }

    fn write_device_parameter(&self, parameter: DeviceParameter, value: f64) -> EcResult<()> {
        parameter.validate(value)?;
        self.io().transport().write_value(
            &self.io().tags().device_parameter(parameter),
            parameter.encode(value),
        )?;
        info!(%parameter, value, "Device parameter written");
        warn!(%parameter, "Restart the controller for the change to take effect");
        Ok(())
    }
}
