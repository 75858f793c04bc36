//! Simulated continuous-position controller.
//!
//! Motion completes instantly: ST0 homes and lands on the target, ST1 lands
//! on the target at the forward end, RES restores the alarm line.

use crate::signals::{DeviceParameter, Parameter, Signal, TagMap};
use ec_common::config::ControllerConfig;
use ec_transport::{Effect, SimHandle, SimulatedTransport, TagValue};

/// Build a simulated controller with factory state and reactions.
#[must_use]
pub fn simulated_controller(config: &ControllerConfig) -> (SimulatedTransport, SimHandle) {
    let tags = TagMap::new(&config.tags);
    let sim = SimulatedTransport::new();
    let handle = sim.handle();

    for signal in [
        Signal::St0,
        Signal::St1,
        Signal::Res,
        Signal::Bkrls,
        Signal::Ls0,
        Signal::Ls1,
        Signal::Pe0,
        Signal::Pe1,
    ] {
        handle.set(tags.signal(signal), false);
    }
    handle.set(tags.signal(Signal::Alm), true);

    let motion = &config.motion;
    for (parameter, value) in [
        (Parameter::Position, 0.0),
        (Parameter::TargetPos, 0.0),
        (Parameter::Speed, motion.default_speed),
        (Parameter::Acceleration, motion.default_acceleration),
        (Parameter::Deceleration, motion.default_deceleration),
        (Parameter::PushPosition, 0.0),
    ] {
        handle.set(tags.parameter(parameter), value);
    }
    handle.set(tags.parameter(Parameter::HomeComplete), false);
    handle.set(tags.parameter(Parameter::PushMode), false);
    handle.set(tags.parameter(Parameter::PushForce), 0i64);
    if let Some(address) = tags.alarm_code() {
        handle.set(address.clone(), 0u16);
    }

    for parameter in DeviceParameter::ALL {
        let value = match parameter {
            DeviceParameter::MotionRange => config.controller.max_rotation,
            DeviceParameter::LsDetectionRange => 0.1,
            _ => 0.0,
        };
        handle.set(tags.device_parameter(parameter), parameter.encode(value));
    }

    let position = tags.parameter(Parameter::Position);
    let target = tags.parameter(Parameter::TargetPos);
    let arrive = || Effect::Copy {
        from: target.clone(),
        to: position.clone(),
    };
    let ls0 = tags.signal(Signal::Ls0);
    let ls1 = tags.signal(Signal::Ls1);

    handle.on_write(
        tags.signal(Signal::St0),
        true,
        vec![
            Effect::Set(tags.parameter(Parameter::HomeComplete), TagValue::Bool(true)),
            arrive(),
            Effect::Set(ls0.clone(), TagValue::Bool(true)),
            Effect::Set(ls1.clone(), TagValue::Bool(false)),
        ],
    );
    handle.on_write(
        tags.signal(Signal::St1),
        true,
        vec![
            arrive(),
            Effect::Set(ls1, TagValue::Bool(true)),
            Effect::Set(ls0, TagValue::Bool(false)),
        ],
    );

    let mut reset = vec![Effect::Set(tags.signal(Signal::Alm), TagValue::Bool(true))];
    if let Some(address) = tags.alarm_code() {
        reset.push(Effect::Set(address.clone(), TagValue::Word(0)));
    }
    handle.on_write(tags.signal(Signal::Res), true, reset);

    (sim, handle)
}
