//! Status snapshots and alarm reporting.

use crate::actuator::Actuator;
use crate::codec::{AxisStatus, GatewayStatus};
use crate::gateway::Gateway;
use crate::io::PositionIo;
use crate::ports::StatusPort;
use crate::signals::{Parameter, Signal};
use ec_common::error::{ActuatorError, EcResult};
use ec_transport::{Address, SharedTransport, TagValue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::SystemTime;
use tracing::debug;

/// A serializable status report.
pub trait StatusReport: Serialize {
    /// Description of the active alarm, if any.
    fn active_alarm(&self) -> Option<String>;

    /// Flatten into dotted key/value pairs, e.g. `alarm.code = A1`.
    fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        match serde_json::to_value(self) {
            Ok(value) => flatten_into(&mut out, String::new(), &value),
            Err(e) => out.push((String::from("error"), e.to_string())),
        }
        out
    }
}

fn flatten_into(out: &mut Vec<(String, String)>, prefix: String, value: &serde_json::Value) {
    use serde_json::Value;

    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(out, join(key), child);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(out, join(&index.to_string()), child);
            }
        }
        Value::String(s) => out.push((prefix, s.clone())),
        Value::Null => out.push((prefix, String::from("-"))),
        other => out.push((prefix, other.to_string())),
    }
}

fn timestamp() -> String {
    humantime::format_rfc3339_millis(SystemTime::now()).to_string()
}

/// Human-readable description of an alarm code.
///
/// The first character classifies the alarm; an empty or absent code means
/// no alarm.
#[must_use]
pub fn describe_alarm(code: Option<&str>) -> String {
    let Some(code) = code.filter(|c| !c.is_empty()) else {
        return String::from("No alarm");
    };
    let class = match code.chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('A') => "Overload",
        Some('B') => "Motor error",
        Some('C') => "Controller error",
        Some('D') => "Controller-encoder error",
        Some('E') => "Power supply error",
        _ => return format!("Unknown alarm: {code}"),
    };
    format!("{class} ({code})")
}

/// Render an alarm code tag value. Zero and booleans mean no alarm.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn format_alarm_code(value: &TagValue) -> Option<String> {
    match value {
        TagValue::Word(0) | TagValue::Int(0) | TagValue::Bool(_) => None,
        TagValue::Word(code) => Some(format!("{code:X}")),
        TagValue::Int(code) => Some(format!("{code:X}")),
        TagValue::Real(code) if *code == 0.0 => None,
        TagValue::Real(code) => Some(code.to_string()),
    }
}

/// Transport connection state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    /// Transport connected.
    pub connected: bool,
    /// Peer description.
    pub address: String,
}

/// Position report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionStatus {
    /// Current position, if readable.
    pub current: Option<f64>,
    /// Unit of `current`.
    pub unit: String,
}

/// Motion parameter report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionStatus {
    /// Home sequence completed.
    pub home_complete: bool,
    /// Speed setpoint.
    pub speed: Option<f64>,
    /// Acceleration setpoint.
    pub acceleration: Option<f64>,
    /// Deceleration setpoint.
    pub deceleration: Option<f64>,
}

/// Alarm report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmStatus {
    /// Alarm present.
    pub active: bool,
    /// Alarm code, if the controller reports one.
    pub code: Option<String>,
    /// Description of `code`.
    pub description: String,
}

/// Maintenance counters. Absent when not configured or unreadable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceStatus {
    /// Total number of moves.
    pub total_moves: Option<f64>,
    /// Accumulated travel distance.
    pub travel_distance: Option<f64>,
    /// Overload level.
    pub overload_level: Option<f64>,
}

/// Full status of a continuous-position controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// RFC 3339 capture time.
    pub timestamp: String,
    /// Connection state.
    pub connection: ConnectionStatus,
    /// Position.
    pub position: PositionStatus,
    /// Signal states; unreadable signals report `false`.
    pub signals: BTreeMap<String, bool>,
    /// Motion parameters.
    pub motion: MotionStatus,
    /// Alarm.
    pub alarm: AlarmStatus,
    /// Maintenance counters.
    pub maintenance: MaintenanceStatus,
}

impl StatusReport for StatusSnapshot {
    fn active_alarm(&self) -> Option<String> {
        self.alarm.active.then(|| self.alarm.description.clone())
    }
}

/// One alarm history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmRecord {
    /// Slot index, 0 = newest.
    pub index: usize,
    /// Alarm code.
    pub code: String,
    /// Description of `code`.
    pub description: String,
    /// Controller timestamp of the slot, if a timestamp tag is configured
    /// and readable. Passed through as the controller reports it.
    pub timestamp: Option<String>,
}

fn format_timestamp(value: &TagValue) -> String {
    match value {
        TagValue::Bool(b) => b.to_string(),
        TagValue::Int(i) => i.to_string(),
        TagValue::Real(r) => r.to_string(),
        TagValue::Word(w) => w.to_string(),
    }
}

fn read_optional(transport: &SharedTransport, address: Option<&Address>) -> Option<f64> {
    let address = address?;
    match transport.read_f64(address) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(%address, error = %e, "Optional status value unreadable");
            None
        }
    }
}

impl<IO: PositionIo> StatusPort for Actuator<IO> {
    type Snapshot = StatusSnapshot;

    fn snapshot(&self) -> EcResult<StatusSnapshot> {
        let transport = self.io().transport();
        if !transport.is_connected() {
            return Err(ActuatorError::NotConnected);
        }
        let tags = self.io().tags();
        let parameter = |p: Parameter| read_optional(transport, Some(&tags.parameter(p)));

        let signals = Signal::STATUS
            .into_iter()
            .map(|signal| {
                let value = transport.read_bool(&tags.signal(signal)).unwrap_or(false);
                (signal.name().to_string(), value)
            })
            .collect();

        let code = tags
            .alarm_code()
            .and_then(|address| transport.read(address))
            .as_ref()
            .and_then(format_alarm_code);
        let [total_moves, travel_distance, overload_level] = tags.maintenance();

        Ok(StatusSnapshot {
            timestamp: timestamp(),
            connection: ConnectionStatus {
                connected: true,
                address: transport.peer(),
            },
            position: PositionStatus {
                current: parameter(Parameter::Position),
                unit: String::from("degree"),
            },
            signals,
            motion: MotionStatus {
                home_complete: transport
                    .read_bool(&tags.parameter(Parameter::HomeComplete))
                    .unwrap_or(false),
                speed: parameter(Parameter::Speed),
                acceleration: parameter(Parameter::Acceleration),
                deceleration: parameter(Parameter::Deceleration),
            },
            alarm: AlarmStatus {
                active: self.is_alarmed(),
                description: describe_alarm(code.as_deref()),
                code,
            },
            maintenance: MaintenanceStatus {
                total_moves: read_optional(transport, total_moves),
                travel_distance: read_optional(transport, travel_distance),
                overload_level: read_optional(transport, overload_level),
            },
        })
    }

    fn alarm_history(&self) -> EcResult<Vec<AlarmRecord>> {
        let transport = self.io().transport();
        if !transport.is_connected() {
            return Err(ActuatorError::NotConnected);
        }
        let tags = self.io().tags();
        let records = tags
            .alarm_history()
            .iter()
            .enumerate()
            .filter_map(|(index, address)| {
                let code = format_alarm_code(&transport.read(address)?)?;
                let timestamp = tags
                    .alarm_time(index)
                    .and_then(|time| transport.read(time))
                    .map(|value| format_timestamp(&value));
                Some(AlarmRecord {
                    index,
                    description: describe_alarm(Some(&code)),
                    code,
                    timestamp,
                })
            })
            .collect();
        Ok(records)
    }
}

/// Status of one axis behind a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AxisReport {
    /// Unit index.
    pub unit: u8,
    /// Axis index.
    pub axis: u8,
    /// Decoded status, absent if the read failed.
    pub status: Option<AxisStatus>,
}

/// Status of a gateway and every axis behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewaySnapshot {
    /// RFC 3339 capture time.
    pub timestamp: String,
    /// Peer description.
    pub address: String,
    /// Gateway status word.
    pub gateway: GatewayStatus,
    /// Axis status words.
    pub axes: Vec<AxisReport>,
}

impl StatusReport for GatewaySnapshot {
    fn active_alarm(&self) -> Option<String> {
        if self.gateway.alarm {
            return Some(format!("gateway alarm {:02X}", self.gateway.alarm_code));
        }
        self.axes
            .iter()
            .find(|a| a.status.is_some_and(|s| s.alarm))
            .map(|a| format!("unit{}/axis{} alarm", a.unit, a.axis))
    }
}

impl StatusPort for Gateway {
    type Snapshot = GatewaySnapshot;

    fn snapshot(&self) -> EcResult<GatewaySnapshot> {
        if !self.transport().is_connected() {
            return Err(ActuatorError::NotConnected);
        }
        let gateway = self.read_gateway_status()?;
        let axes = self
            .read_all_axes()
            .into_iter()
            .map(|(id, status)| AxisReport {
                unit: id.unit(),
                axis: id.axis(),
                status: status.ok(),
            })
            .collect();
        Ok(GatewaySnapshot {
            timestamp: timestamp(),
            address: self.transport().peer(),
            gateway,
            axes,
        })
    }
}
