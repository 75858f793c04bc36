//! Axis I/O backends.
//!
//! [`AxisIo`] is the minimal signal surface the state machine needs. It is
//! implemented by [`TagAxis`] for the continuous-position controller
//! (one CIP tag per signal) and by [`GatewayAxis`] for end-stop axes
//! behind a gateway (bits in packed words). Only [`TagAxis`] implements
//! [`PositionIo`], so positioning is unavailable on end-stop axes at
//! compile time.

use crate::codec::AxisCommand;
use crate::gateway::{AxisId, Gateway};
use crate::signals::{Direction, Parameter, Signal, TagMap};
use ec_common::error::{ActuatorError, EcResult};
use ec_transport::SharedTransport;
use std::sync::Arc;

/// Signal-level access to one axis.
pub trait AxisIo: Send + Sync {
    /// Transport carrying the axis signals.
    fn transport(&self) -> &SharedTransport;

    /// Short label for logs.
    fn describe(&self) -> String;

    /// Drive a command signal.
    fn set_command(&self, command: AxisCommand, value: bool) -> EcResult<()>;

    /// Whether the end in `direction` has been reached.
    fn end_reached(&self, direction: Direction) -> EcResult<bool>;

    /// Whether the home sequence has completed.
    fn home_complete(&self) -> EcResult<bool>;

    /// Alarm status, normalized so that `true` means an alarm is present.
    fn is_alarmed(&self) -> EcResult<bool>;

    /// Whether [`write_speed`](Self::write_speed) is available.
    fn supports_speed(&self) -> bool {
        false
    }

    /// Write the speed setpoint.
    fn write_speed(&self, speed: f64) -> EcResult<()> {
        let _ = speed;
        Err(ActuatorError::InvalidArgument(format!(
            "{} has no speed parameter",
            self.describe()
        )))
    }
}

/// Axes with a continuous position and parameter tags.
pub trait PositionIo: AxisIo {
    /// Tag map of the controller.
    fn tags(&self) -> &TagMap;
}

/// Continuous-position controller addressed by CIP tags.
#[derive(Debug, Clone)]
pub struct TagAxis {
    transport: SharedTransport,
    tags: TagMap,
}

impl TagAxis {
    /// Create an axis over `transport` using `tags`.
    #[must_use]
    pub fn new(transport: SharedTransport, tags: TagMap) -> Self {
        Self { transport, tags }
    }

    fn command_signal(command: AxisCommand) -> Signal {
        match command {
            AxisCommand::St0 => Signal::St0,
            AxisCommand::St1 => Signal::St1,
            AxisCommand::Res => Signal::Res,
        }
    }
}

impl AxisIo for TagAxis {
    fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.tags.prefix(), self.transport.peer())
    }

    fn set_command(&self, command: AxisCommand, value: bool) -> EcResult<()> {
        self.transport
            .write_value(&self.tags.signal(Self::command_signal(command)), value)
    }

    fn end_reached(&self, direction: Direction) -> EcResult<bool> {
        self.transport
            .read_bool(&self.tags.signal(direction.end_signal()))
    }

    fn home_complete(&self) -> EcResult<bool> {
        self.transport
            .read_bool(&self.tags.parameter(Parameter::HomeComplete))
    }

    fn is_alarmed(&self) -> EcResult<bool> {
        // b-contact: the line drops while an alarm is present
        self.transport
            .read_bool(&self.tags.signal(Signal::Alm))
            .map(|alm| !alm)
    }

    fn supports_speed(&self) -> bool {
        true
    }

    fn write_speed(&self, speed: f64) -> EcResult<()> {
        self.transport
            .write_value(&self.tags.parameter(Parameter::Speed), speed)
    }
}

impl PositionIo for TagAxis {
    fn tags(&self) -> &TagMap {
        &self.tags
    }
}

/// End-stop axis behind a gateway.
#[derive(Debug, Clone)]
pub struct GatewayAxis {
    gateway: Arc<Gateway>,
    id: AxisId,
}

impl GatewayAxis {
    /// Create an axis handle; several handles may share one gateway.
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, id: AxisId) -> Self {
        Self { gateway, id }
    }

    /// Axis position behind the gateway.
    #[must_use]
    pub fn id(&self) -> AxisId {
        self.id
    }

    /// Shared gateway.
    #[must_use]
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }
}

impl AxisIo for GatewayAxis {
    fn transport(&self) -> &SharedTransport {
        self.gateway.transport()
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.id, self.gateway.transport().peer())
    }

    fn set_command(&self, command: AxisCommand, value: bool) -> EcResult<()> {
        self.gateway.send_command(self.id, command, value).map(|_| ())
    }

    fn end_reached(&self, direction: Direction) -> EcResult<bool> {
        Ok(self.gateway.read_axis_status(self.id)?.end_reached(direction))
    }

    fn home_complete(&self) -> EcResult<bool> {
        let status = self.gateway.read_axis_status(self.id)?;
        Ok(status.backward_end || status.forward_end)
    }

    fn is_alarmed(&self) -> EcResult<bool> {
        Ok(self.gateway.read_axis_status(self.id)?.alarm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec_common::config::GatewayConfig;
    use ec_transport::{Address, SimulatedTransport, TagValue};

    #[test]
    fn test_tag_axis_alarm_is_negative_logic() {
        let sim = SimulatedTransport::new();
        let handle = sim.handle();
        let transport = SharedTransport::new(sim);
        transport.connect();
        let axis = TagAxis::new(transport, TagMap::default());

        handle.set(Address::tag("Controller.ALM"), true);
        assert!(!axis.is_alarmed().unwrap());
        handle.set(Address::tag("Controller.ALM"), false);
        assert!(axis.is_alarmed().unwrap());
    }

    #[test]
    fn test_tag_axis_commands() {
        let sim = SimulatedTransport::new();
        let handle = sim.handle();
        let transport = SharedTransport::new(sim);
        transport.connect();
        let axis = TagAxis::new(transport, TagMap::default());

        axis.set_command(AxisCommand::Res, true).unwrap();
        axis.write_speed(45.0).unwrap();
        assert_eq!(
            handle.writes(),
            vec![
                (Address::tag("Controller.RES"), TagValue::Bool(true)),
                (Address::tag("Controller.Speed"), TagValue::Real(45.0)),
            ]
        );
    }

    #[test]
    fn test_gateway_axis_reads_status_bits() {
        let sim = SimulatedTransport::new();
        let handle = sim.handle();
        let transport = SharedTransport::new(sim);
        transport.connect();
        let gateway = Arc::new(Gateway::new(transport, GatewayConfig::default()));
        let id = AxisId::new(0, 0, gateway.layout()).unwrap();
        let axis = GatewayAxis::new(gateway, id);

        handle.set(Address::Word(4), 0x0020u16);
        assert!(axis.home_complete().unwrap());
        assert!(axis.end_reached(Direction::Backward).unwrap());
        assert!(!axis.end_reached(Direction::Forward).unwrap());
        assert!(!axis.is_alarmed().unwrap());
        assert!(matches!(
            axis.write_speed(50.0),
            Err(ActuatorError::InvalidArgument(_))
        ));
    }
}
