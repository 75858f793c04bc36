//! Signal and parameter map for the continuous-position controller.
//!
//! Every symbolic name resolves to a CIP tag under a configurable prefix,
//! e.g. `Controller.ST0`. Device configuration parameters live at
//! `<prefix>.Parameter<id>`.

use ec_common::config::TagConfig;
use ec_common::error::{ActuatorError, EcResult};
use ec_transport::{Address, TagValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Boolean I/O signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signal {
    /// Backward command (also starts homing).
    St0,
    /// Forward command.
    St1,
    /// Alarm reset command.
    Res,
    /// Brake release. Mapped but never driven.
    Bkrls,
    /// Backward end reached.
    Ls0,
    /// Forward end reached.
    Ls1,
    /// Backward push complete.
    Pe0,
    /// Forward push complete.
    Pe1,
    /// Alarm line, b-contact: `false` while an alarm is present.
    Alm,
}

impl Signal {
    /// Signals reported in a status snapshot.
    pub const STATUS: [Signal; 8] = [
        Signal::St0,
        Signal::St1,
        Signal::Ls0,
        Signal::Ls1,
        Signal::Pe0,
        Signal::Pe1,
        Signal::Alm,
        Signal::Res,
    ];

    /// Tag suffix of the signal.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::St0 => "ST0",
            Self::St1 => "ST1",
            Self::Res => "RES",
            Self::Bkrls => "BKRLS",
            Self::Ls0 => "LS0",
            Self::Ls1 => "LS1",
            Self::Pe0 => "PE0",
            Self::Pe1 => "PE1",
            Self::Alm => "ALM",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Numeric and flag parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    /// Current position in degrees.
    Position,
    /// Speed setpoint in degrees per second.
    Speed,
    /// Acceleration in G.
    Acceleration,
    /// Deceleration in G.
    Deceleration,
    /// Target position in degrees.
    TargetPos,
    /// Set once the home sequence has completed.
    HomeComplete,
    /// Push force in percent.
    PushForce,
    /// Push position in degrees.
    PushPosition,
    /// Push mode enable.
    PushMode,
}

impl Parameter {
    /// Tag suffix of the parameter.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Position => "Position",
            Self::Speed => "Speed",
            Self::Acceleration => "Acceleration",
            Self::Deceleration => "Deceleration",
            Self::TargetPos => "TargetPos",
            Self::HomeComplete => "HomeComplete",
            Self::PushForce => "PushForce",
            Self::PushPosition => "PushPosition",
            Self::PushMode => "PushMode",
        }
    }
}

/// Motion direction of an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Towards the backward end (ST0 / LS0).
    Backward,
    /// Towards the forward end (ST1 / LS1).
    Forward,
}

impl Direction {
    /// Command signal that drives this direction.
    #[must_use]
    pub fn command(self) -> Signal {
        match self {
            Self::Backward => Signal::St0,
            Self::Forward => Signal::St1,
        }
    }

    /// Signal reporting that the end of this direction was reached.
    #[must_use]
    pub fn end_signal(self) -> Signal {
        match self {
            Self::Backward => Signal::Ls0,
            Self::Forward => Signal::Ls1,
        }
    }

    /// Signal reporting push completion in this direction.
    #[must_use]
    pub fn push_signal(self) -> Signal {
        match self {
            Self::Backward => Signal::Pe0,
            Self::Forward => Signal::Pe1,
        }
    }

    /// The other direction.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Backward => Self::Forward,
            Self::Forward => Self::Backward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backward => write!(f, "backward"),
            Self::Forward => write!(f, "forward"),
        }
    }
}

/// Device configuration parameters, addressed by immutable ID.
///
/// Changes take effect only after the controller restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceParameter {
    /// Usable rotation range in degrees.
    MotionRange,
    /// Window around an end position in which LS signals turn on.
    LsDetectionRange,
    /// 0 = reverse, 1 = forward.
    HomeDirection,
    /// Offset of the home position.
    HomeOffset,
    /// Smooth acceleration/deceleration.
    SmoothMotion,
    /// Current suppression while stopped.
    StopCurrentMode,
    /// Wireless teaching function.
    WirelessFunction,
    /// Power-saving mode.
    PowerSave,
}

impl DeviceParameter {
    /// Every device parameter in ID order.
    pub const ALL: [DeviceParameter; 8] = [
        DeviceParameter::MotionRange,
        DeviceParameter::LsDetectionRange,
        DeviceParameter::HomeDirection,
        DeviceParameter::HomeOffset,
        DeviceParameter::SmoothMotion,
        DeviceParameter::StopCurrentMode,
        DeviceParameter::WirelessFunction,
        DeviceParameter::PowerSave,
    ];

    /// Upper bound of the motion range parameter in degrees.
    pub const MAX_MOTION_RANGE: f64 = 330.0;

    /// Controller parameter number.
    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            Self::MotionRange => 1,
            Self::LsDetectionRange => 2,
            Self::HomeDirection => 3,
            Self::HomeOffset => 4,
            Self::SmoothMotion => 5,
            Self::StopCurrentMode => 6,
            Self::WirelessFunction => 7,
            Self::PowerSave => 8,
        }
    }

    /// Snake-case name used in backups.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::MotionRange => "motion_range",
            Self::LsDetectionRange => "ls_detection_range",
            Self::HomeDirection => "home_direction",
            Self::HomeOffset => "home_offset",
            Self::SmoothMotion => "smooth_motion",
            Self::StopCurrentMode => "stop_current_mode",
            Self::WirelessFunction => "wireless_function",
            Self::PowerSave => "power_save",
        }
    }

    /// Look a parameter up by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Smallest LS detection range: one encoder step at the output,
    /// 360 / 45 / 800 degrees.
    #[must_use]
    pub fn min_ls_detection_range() -> f64 {
        360.0 / 45.0 / 800.0
    }

    fn is_flag(self) -> bool {
        matches!(
            self,
            Self::HomeDirection
                | Self::SmoothMotion
                | Self::StopCurrentMode
                | Self::WirelessFunction
                | Self::PowerSave
        )
    }

    /// Check a value against the parameter's validity range.
    #[allow(clippy::float_cmp)]
    pub fn validate(self, value: f64) -> EcResult<()> {
        let valid = value.is_finite()
            && match self {
                Self::MotionRange => (0.0..=Self::MAX_MOTION_RANGE).contains(&value),
                Self::LsDetectionRange => value >= Self::min_ls_detection_range(),
                Self::HomeOffset => true,
                _ => value == 0.0 || value == 1.0,
            };
        if valid {
            Ok(())
        } else {
            Err(ActuatorError::InvalidArgument(format!(
                "{} = {value} is out of range",
                self.name()
            )))
        }
    }

    /// Transport value for a validated setting.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(self, value: f64) -> TagValue {
        if self.is_flag() {
            TagValue::Int(value as i64)
        } else {
            TagValue::Real(value)
        }
    }
}

impl fmt::Display for DeviceParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name(), self.id())
    }
}

/// Resolves symbolic names to tag addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct TagMap {
    prefix: String,
    alarm_code: Option<Address>,
    total_moves: Option<Address>,
    travel_distance: Option<Address>,
    overload_level: Option<Address>,
    alarm_history: Vec<Address>,
    alarm_times: Vec<Address>,
}

impl Default for TagMap {
    fn default() -> Self {
        Self::new(&TagConfig::default())
    }
}

impl TagMap {
    /// Build the map from tag configuration.
    #[must_use]
    pub fn new(config: &TagConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            alarm_code: config.alarm_code.as_deref().map(Address::tag),
            total_moves: config.total_moves.as_deref().map(Address::tag),
            travel_distance: config.travel_distance.as_deref().map(Address::tag),
            overload_level: config.overload_level.as_deref().map(Address::tag),
            alarm_history: config.alarm_history.iter().map(Address::tag).collect(),
            alarm_times: config.alarm_times.iter().map(Address::tag).collect(),
        }
    }

    /// Tag prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Address of a signal.
    #[must_use]
    pub fn signal(&self, signal: Signal) -> Address {
        Address::Tag(format!("{}.{}", self.prefix, signal.name()))
    }

    /// Address of a parameter.
    #[must_use]
    pub fn parameter(&self, parameter: Parameter) -> Address {
        Address::Tag(format!("{}.{}", self.prefix, parameter.name()))
    }

    /// Address of a device configuration parameter.
    #[must_use]
    pub fn device_parameter(&self, parameter: DeviceParameter) -> Address {
        Address::Tag(format!("{}.Parameter{}", self.prefix, parameter.id()))
    }

    /// Current alarm code, if configured.
    #[must_use]
    pub fn alarm_code(&self) -> Option<&Address> {
        self.alarm_code.as_ref()
    }

    /// Maintenance counters, if configured: total moves, travel distance,
    /// overload level.
    #[must_use]
    pub fn maintenance(&self) -> [Option<&Address>; 3] {
        [
            self.total_moves.as_ref(),
            self.travel_distance.as_ref(),
            self.overload_level.as_ref(),
        ]
    }

    /// Alarm history slots, newest first.
    #[must_use]
    pub fn alarm_history(&self) -> &[Address] {
        &self.alarm_history
    }

    /// Timestamp address of alarm history slot `index`, if configured.
    #[must_use]
    pub fn alarm_time(&self, index: usize) -> Option<&Address> {
        self.alarm_times.get(index)
    }
}
