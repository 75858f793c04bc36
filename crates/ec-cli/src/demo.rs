//! Scripted demonstration sequences.

use ec_common::error::EcResult;
use ec_motion::commands::{end_sequence, jog, move_sequence};
use ec_motion::{Direction, MotionPort, PositionPort};
use std::time::Duration;
use tracing::info;

/// Speeds and timings of the demo.
#[derive(Debug, Clone)]
pub struct DemoPlan {
    /// Positions visited after homing.
    pub targets: Vec<f64>,
    /// Speed for the position sequence.
    pub sequence_speed: f64,
    /// Dwell between sequence steps and end stops.
    pub dwell: Duration,
    /// Jog speed.
    pub jog_speed: f64,
    /// Length of each jog.
    pub jog_time: Duration,
    /// Pause between the two jogs.
    pub jog_pause: Duration,
    /// Speed of the final return to zero.
    pub return_speed: f64,
}

impl Default for DemoPlan {
    fn default() -> Self {
        Self {
            targets: vec![90.0, 180.0, 270.0, 0.0],
            sequence_speed: 200.0,
            dwell: Duration::from_secs(2),
            jog_speed: 50.0,
            jog_time: Duration::from_secs(3),
            jog_pause: Duration::from_secs(1),
            return_speed: 300.0,
        }
    }
}

/// Home, visit the target positions, jog both ways and return to zero.
pub fn run_position_demo(port: &dyn PositionPort, plan: &DemoPlan) -> EcResult<()> {
    info!("Demo: homing");
    port.home()?;

    info!("Demo: position sequence");
    move_sequence(port, &plan.targets, Some(plan.sequence_speed), plan.dwell)?;

    info!("Demo: jog");
    jog(port, Direction::Forward, Some(plan.jog_speed), Some(plan.jog_time))?;
    port.pause(plan.jog_pause)?;
    jog(port, Direction::Backward, Some(plan.jog_speed), Some(plan.jog_time))?;

    info!("Demo: return to zero");
    port.move_to_position(0.0, Some(plan.return_speed))?;
    info!("Demo complete");
    Ok(())
}

/// Home, then visit both end stops. For axes without position data.
pub fn run_end_demo(port: &dyn MotionPort, plan: &DemoPlan) -> EcResult<()> {
    info!("Demo: homing");
    port.home()?;
    end_sequence(
        port,
        &[
            (Direction::Forward, plan.dwell),
            (Direction::Backward, plan.dwell),
        ],
    )?;
    info!("Demo complete");
    Ok(())
}
