//! Axis state machine for motion lifecycle tracking.
//!
//! State transitions follow the actuator's motion lifecycle:
//! IDLE → HOMING → IDLE, IDLE → MOVING → IDLE, any → ALARM, ALARM → IDLE.
//!
//! A motion can only start from IDLE, which rules out re-entrant
//! motion calls on the same axis.

use crate::error::{ActuatorError, EcResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Motion states of a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AxisState {
    /// No motion in progress; ready to accept a command.
    #[default]
    Idle,
    /// Home sequence in progress.
    Homing,
    /// Positioning, end-stop move or jog in progress.
    Moving,
    /// Alarm detected; requires a successful reset.
    Alarm,
}

impl fmt::Display for AxisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Homing => write!(f, "HOMING"),
            Self::Moving => write!(f, "MOVING"),
            Self::Alarm => write!(f, "ALARM"),
        }
    }
}

impl AxisState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: AxisState) -> bool {
        use AxisState::{Alarm, Homing, Idle, Moving};

        matches!(
            (self, target),
            (Idle, Homing)
                | (Idle, Moving)
                | (Homing, Idle)
                | (Moving, Idle)
                // Alarm can be detected from any state
                | (Idle, Alarm)
                | (Homing, Alarm)
                | (Moving, Alarm)
                // Recovery after a successful reset
                | (Alarm, Idle)
        )
    }

    /// Returns true while a motion is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Homing | Self::Moving)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: AxisState,
    previous: Option<AxisState>,
    transition_count: u64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine starting in IDLE.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: AxisState::Idle,
            previous: None,
            transition_count: 0,
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> AxisState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<AxisState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: AxisState) -> EcResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(ActuatorError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Leave HOMING/MOVING for IDLE. No-op from IDLE or ALARM.
    pub fn settle(&mut self) {
        if self.current.is_busy() {
            self.previous = Some(self.current);
            self.current = AxisState::Idle;
            self.transition_count += 1;
        }
    }

    /// Force a transition to ALARM (no-op if already there).
    pub fn enter_alarm(&mut self) {
        if self.current.can_transition_to(AxisState::Alarm) {
            self.previous = Some(self.current);
            self.current = AxisState::Alarm;
            self.transition_count += 1;
        }
    }

    /// Return to IDLE unconditionally, e.g. after disconnect.
    pub fn reset(&mut self) {
        if self.current != AxisState::Idle {
            self.previous = Some(self.current);
            self.current = AxisState::Idle;
            self.transition_count += 1;
        }
    }
}
