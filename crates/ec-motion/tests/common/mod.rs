//! Shared fixtures for ec-motion integration tests.

#![allow(dead_code)]

use ec_common::ControllerConfig;
use ec_motion::{simulated_controller, Actuator, TagAxis, TagMap};
use ec_transport::{Address, SharedTransport, SimHandle, SimulatedTransport};
use std::time::Duration;

/// Configuration with millisecond-scale timing.
pub fn fast_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.timing.home_poll_interval = Duration::from_millis(2);
    config.timing.move_poll_interval = Duration::from_millis(2);
    config.timing.home_timeout = Duration::from_millis(500);
    config.timing.move_timeout = Duration::from_millis(500);
    config.timing.end_timeout = Duration::from_millis(500);
    config.timing.reset_settle = Duration::from_millis(1);
    config.timing.monitor_interval = Duration::from_millis(2);
    config
}

/// Tag address under the default prefix.
pub fn tag(name: &str) -> Address {
    Address::tag(format!("Controller.{name}"))
}

/// Connected actuator over the reacting simulated controller.
pub fn sim_actuator(config: &ControllerConfig) -> (Actuator<TagAxis>, SimHandle) {
    let (sim, handle) = simulated_controller(config);
    let axis = TagAxis::new(SharedTransport::new(sim), TagMap::new(&config.tags));
    let actuator = Actuator::new(axis, config);
    actuator.connect().unwrap();
    (actuator, handle)
}

/// Connected actuator over a bare simulated transport: no reactions, alarm
/// line healthy, nothing homed.
pub fn bare_actuator(config: &ControllerConfig) -> (Actuator<TagAxis>, SimHandle) {
    let sim = SimulatedTransport::new();
    let handle = sim.handle();
    let axis = TagAxis::new(SharedTransport::new(sim), TagMap::new(&config.tags));
    let actuator = Actuator::new(axis, config);
    actuator.connect().unwrap();
    handle.set(tag("ALM"), true);
    handle.set(tag("HomeComplete"), false);
    handle.set(tag("Position"), 0.0);
    handle.set(tag("LS0"), false);
    handle.set(tag("LS1"), false);
    (actuator, handle)
}
