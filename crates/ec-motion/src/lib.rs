//! Motion control for IAI EC actuators.
//!
//! Provides:
//! - [`signals`]: symbolic signal/parameter map of the position controller
//! - [`codec`]: bit-field codec for gateway control and status words
//! - [`gateway`]: locked read-modify-write access to a multi-axis gateway
//! - [`io`]: axis I/O backends over tags or gateway bits
//! - [`actuator`]: home/move/jog/stop state machine
//! - [`ports`]: capability traits consumed by commands and the CLI
//! - [`commands`]: sequences, cycles, push operation, parameter backup
//! - [`status`] and [`monitor`]: snapshots and background polling
//! - [`sim_device`]: simulated controller for demos and tests

pub mod actuator;
pub mod codec;
pub mod commands;
pub mod gateway;
pub mod io;
pub mod monitor;
pub mod ports;
pub mod signals;
pub mod sim_device;
pub mod status;

pub use actuator::Actuator;
pub use codec::{AxisCommand, AxisStatus, GatewayMode, GatewayStatus};
pub use commands::ParameterBackup;
pub use gateway::{AxisId, Gateway};
pub use io::{AxisIo, GatewayAxis, PositionIo, TagAxis};
pub use monitor::StatusMonitor;
pub use ports::{MotionPort, ParameterPort, PositionPort, StatusPort};
pub use signals::{DeviceParameter, Direction, Parameter, Signal, TagMap};
pub use sim_device::simulated_controller;
pub use status::{AlarmRecord, GatewaySnapshot, StatusReport, StatusSnapshot};
