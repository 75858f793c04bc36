//! Unit conversions for rotary EC actuators.

use std::time::Duration;

/// Angular acceleration of 1 G expressed in degrees per second squared,
/// as used by the controller's acceleration parameter.
pub const DEG_PER_S2_PER_G: f64 = 9807.0;

/// Encoder pulses per output degree.
#[must_use]
pub fn pulses_per_degree(reduction_ratio: u32, encoder_resolution: u32) -> f64 {
    f64::from(encoder_resolution) * f64::from(reduction_ratio) / 360.0
}

/// Convert an output angle to encoder pulses (truncating).
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn degree_to_pulse(degree: f64, reduction_ratio: u32, encoder_resolution: u32) -> i64 {
    (degree * pulses_per_degree(reduction_ratio, encoder_resolution)) as i64
}

/// Convert encoder pulses to an output angle.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pulse_to_degree(pulse: i64, reduction_ratio: u32, encoder_resolution: u32) -> f64 {
    pulse as f64 / pulses_per_degree(reduction_ratio, encoder_resolution)
}

/// Phases of a trapezoidal (or triangular) move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionTime {
    /// Acceleration phase (deceleration is symmetric).
    pub accel: Duration,
    /// Constant-speed phase; zero for a triangular profile.
    pub constant: Duration,
    /// Whole move.
    pub total: Duration,
}

/// Estimate how long a move of `distance` degrees takes at `speed` deg/s
/// with symmetric acceleration `acceleration_g`.
///
/// Returns `None` for non-positive speed or acceleration.
#[must_use]
pub fn estimate_motion_time(distance: f64, speed: f64, acceleration_g: f64) -> Option<MotionTime> {
    if !(speed > 0.0 && acceleration_g > 0.0) {
        return None;
    }
    let distance = distance.abs();
    let acc = acceleration_g * DEG_PER_S2_PER_G;

    let t_acc = speed / acc;
    let s_acc = 0.5 * acc * t_acc * t_acc;

    let (t_acc, t_const) = if 2.0 * s_acc >= distance {
        // Never reaches full speed
        ((distance / acc).sqrt(), 0.0)
    } else {
        (t_acc, (distance - 2.0 * s_acc) / speed)
    };

    Some(MotionTime {
        accel: Duration::from_secs_f64(t_acc),
        constant: Duration::from_secs_f64(t_const),
        total: Duration::from_secs_f64(2.0 * t_acc + t_const),
    })
}
