//! Model-specific motion limits and argument validation.
//!
//! Every check here runs before the first hardware write, so a rejected
//! command has no side effects on the controller.

use crate::config::ControllerConfig;
use crate::error::{ActuatorError, EcResult};
use tracing::warn;

/// Lowest accepted acceleration in G.
pub const MIN_ACCELERATION: f64 = 0.1;

/// Accepted push force range in percent of rated current.
pub const PUSH_FORCE_RANGE: std::ops::RangeInclusive<u8> = 20..=70;

/// Speed and acceleration ceilings for an actuator model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelLimits {
    /// Maximum speed in degrees per second.
    pub max_speed: f64,
    /// Maximum acceleration in G.
    pub max_acceleration: f64,
}

impl ModelLimits {
    /// Look up the limits for a model identifier. Unknown models get the
    /// conservative generic limits.
    #[must_use]
    pub fn for_model(model: &str) -> Self {
        match model {
            "EC-RTC9" => Self {
                max_speed: 600.0,
                max_acceleration: 0.5,
            },
            "EC-RTC12" => Self {
                max_speed: 600.0,
                max_acceleration: 0.7,
            },
            _ => Self {
                max_speed: 500.0,
                max_acceleration: 0.5,
            },
        }
    }
}

/// Validates motion arguments against the configured range and model limits.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionLimits {
    max_rotation: f64,
    min_speed: f64,
    model: ModelLimits,
}

impl MotionLimits {
    /// Build the validator from configuration.
    #[must_use]
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            max_rotation: config.controller.max_rotation,
            min_speed: config.motion.min_speed,
            model: ModelLimits::for_model(&config.controller.model),
        }
    }

    /// Upper bound of the rotation range.
    #[must_use]
    pub fn max_rotation(&self) -> f64 {
        self.max_rotation
    }

    /// Limits of the configured model.
    #[must_use]
    pub fn model(&self) -> ModelLimits {
        self.model
    }

    /// Check `position` is within `[0, max_rotation]`.
    pub fn check_position(&self, position: f64) -> EcResult<()> {
        if (0.0..=self.max_rotation).contains(&position) {
            Ok(())
        } else {
            warn!(position, max = self.max_rotation, "Position out of range");
            Err(ActuatorError::InvalidArgument(format!(
                "position {position} outside [0, {}]",
                self.max_rotation
            )))
        }
    }

    /// Check `speed` is within `[min_speed, max_speed(model)]`.
    pub fn check_speed(&self, speed: f64) -> EcResult<()> {
        if (self.min_speed..=self.model.max_speed).contains(&speed) {
            Ok(())
        } else {
            warn!(speed, min = self.min_speed, max = self.model.max_speed, "Speed out of range");
            Err(ActuatorError::InvalidArgument(format!(
                "speed {speed} outside [{}, {}]",
                self.min_speed, self.model.max_speed
            )))
        }
    }

    /// Check `acceleration` is within `[0.1, max_acceleration(model)]`.
    pub fn check_acceleration(&self, acceleration: f64) -> EcResult<()> {
        if (MIN_ACCELERATION..=self.model.max_acceleration).contains(&acceleration) {
            Ok(())
        } else {
            warn!(
                acceleration,
                max = self.model.max_acceleration,
                "Acceleration out of range"
            );
            Err(ActuatorError::InvalidArgument(format!(
                "acceleration {acceleration} outside [{MIN_ACCELERATION}, {}]",
                self.model.max_acceleration
            )))
        }
    }

    /// Check a push force percentage.
    pub fn check_push_force(force: u8) -> EcResult<()> {
        if PUSH_FORCE_RANGE.contains(&force) {
            Ok(())
        } else {
            Err(ActuatorError::InvalidArgument(format!(
                "push force {force}% outside [{}, {}]",
                PUSH_FORCE_RANGE.start(),
                PUSH_FORCE_RANGE.end()
            )))
        }
    }
}
