//! Configuration structures for the actuator client.
//!
//! Supports TOML deserialization with defaults matching the controller's
//! factory settings, so an empty file describes an EC-RTC12 on the
//! default EtherNet/IP address.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Transport selection and connection parameters.
    pub connection: ConnectionConfig,

    /// Actuator model and mechanical range.
    pub controller: DeviceConfig,

    /// Default motion parameters.
    pub motion: MotionConfig,

    /// Timeouts, poll intervals and settle delays.
    pub timing: TimingConfig,

    /// Gateway (multi-axis) layout.
    pub gateway: GatewayConfig,

    /// Tag naming and configuration-supplied addresses.
    pub tags: TagConfig,
}

/// Supported transport drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// In-memory simulated device.
    Simulated,
    /// EtherNet/IP (CIP) tag access via an external driver.
    #[default]
    Cip,
    /// Modbus RTU over a serial line.
    ModbusRtu,
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Transport driver.
    pub driver: TransportKind,

    /// Controller IP address (CIP).
    pub address: String,

    /// EtherNet/IP port.
    pub port: u16,

    /// Connect and I/O timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Serial device path (Modbus RTU).
    pub serial_port: PathBuf,

    /// Baud rate (Modbus RTU).
    pub baud_rate: u32,

    /// Longest wait for a Modbus RTU response before the exchange fails.
    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,

    /// Modbus slave ID.
    pub slave_id: u8,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: TransportKind::Cip,
            address: String::from("192.168.1.100"),
            port: 44818,
            timeout: Duration::from_secs(5),
            serial_port: PathBuf::from("/dev/ttyUSB0"),
            baud_rate: 115_200,
            response_timeout: Duration::from_secs(1),
            slave_id: 1,
        }
    }
}

/// Actuator model and mechanics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Model identifier, e.g. "EC-RTC12". Selects speed/acceleration limits.
    pub model: String,

    /// Upper bound of the rotation range in degrees (lower bound is 0).
    pub max_rotation: f64,

    /// Gear reduction ratio.
    pub reduction_ratio: u32,

    /// Encoder pulses per motor revolution.
    pub encoder_resolution: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            model: String::from("EC-RTC12"),
            max_rotation: 330.0,
            reduction_ratio: 45,
            encoder_resolution: 800,
        }
    }
}

/// Default motion parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Default speed in degrees per second.
    pub default_speed: f64,

    /// Default acceleration in G.
    pub default_acceleration: f64,

    /// Default deceleration in G.
    pub default_deceleration: f64,

    /// Lowest accepted speed in degrees per second.
    pub min_speed: f64,

    /// Jog speed used when none is given.
    pub jog_speed: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            default_speed: 100.0,
            default_acceleration: 0.3,
            default_deceleration: 0.3,
            min_speed: 20.0,
            jog_speed: 30.0,
        }
    }
}

/// Timeouts and poll intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Home sequence timeout.
    #[serde(with = "humantime_serde")]
    pub home_timeout: Duration,

    /// Poll interval while homing.
    #[serde(with = "humantime_serde")]
    pub home_poll_interval: Duration,

    /// Positioning timeout; also the ceiling for caller-supplied timeouts.
    #[serde(with = "humantime_serde")]
    pub move_timeout: Duration,

    /// End-stop move timeout.
    #[serde(with = "humantime_serde")]
    pub end_timeout: Duration,

    /// Poll interval while moving.
    #[serde(with = "humantime_serde")]
    pub move_poll_interval: Duration,

    /// Delay after each edge of the alarm reset pulse.
    #[serde(with = "humantime_serde")]
    pub reset_settle: Duration,

    /// Background status monitor period.
    #[serde(with = "humantime_serde")]
    pub monitor_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            home_timeout: Duration::from_secs(30),
            home_poll_interval: Duration::from_millis(100),
            move_timeout: Duration::from_secs(60),
            end_timeout: Duration::from_secs(10),
            move_poll_interval: Duration::from_millis(50),
            reset_settle: Duration::from_millis(500),
            monitor_interval: Duration::from_millis(100),
        }
    }
}

/// Gateway word layout. Offsets are transport word addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Number of EC units behind the gateway.
    pub unit_count: u8,

    /// Gateway status word address.
    pub status_offset: u16,

    /// Address of unit 0's control word.
    pub control_base: u16,

    /// Address distance between consecutive units' control words.
    pub control_stride: u16,

    /// Address of unit 0 / axis 0 status word.
    pub axis_status_base: u16,

    /// Address distance between units' status blocks.
    pub axis_status_unit_stride: u16,

    /// Address distance between axes within a unit.
    pub axis_status_axis_stride: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            unit_count: 1,
            status_offset: 0,
            control_base: 2,
            control_stride: 2,
            axis_status_base: 4,
            axis_status_unit_stride: 8,
            axis_status_axis_stride: 2,
        }
    }
}

/// Tag naming and configuration-supplied addresses.
///
/// Alarm-history and maintenance tags are not fixed by the controller
/// documentation, so they are only read when configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    /// Prefix for every controller tag, e.g. "Controller".
    pub prefix: String,

    /// Current alarm code tag.
    pub alarm_code: Option<String>,

    /// Total move counter tag.
    pub total_moves: Option<String>,

    /// Accumulated travel distance tag.
    pub travel_distance: Option<String>,

    /// Overload level tag.
    pub overload_level: Option<String>,

    /// Alarm history code tags, newest first.
    pub alarm_history: Vec<String>,

    /// Alarm history timestamp tags, paired by slot with `alarm_history`.
    /// May be shorter; slots without one carry no timestamp.
    pub alarm_times: Vec<String>,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            prefix: String::from("Controller"),
            alarm_code: Some(String::from("Controller.AlarmCode")),
            total_moves: None,
            travel_distance: None,
            overload_level: None,
            alarm_history: Vec::new(),
            alarm_times: Vec::new(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.controller.max_rotation.is_finite() && self.controller.max_rotation > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "controller.max_rotation must be positive, got {}",
                self.controller.max_rotation
            )));
        }
        if self.motion.min_speed <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "motion.min_speed must be positive, got {}",
                self.motion.min_speed
            )));
        }
        if self.gateway.unit_count == 0 {
            return Err(ConfigError::Invalid(
                "gateway.unit_count must be at least 1".into(),
            ));
        }
        if self.connection.baud_rate == 0 {
            return Err(ConfigError::Invalid(
                "connection.baud_rate must be positive".into(),
            ));
        }
        if self.connection.response_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connection.response_timeout must be positive".into(),
            ));
        }
        if self.tags.alarm_times.len() > self.tags.alarm_history.len() {
            return Err(ConfigError::Invalid(format!(
                "tags.alarm_times has {} entries for {} alarm_history slots",
                self.tags.alarm_times.len(),
                self.tags.alarm_history.len()
            )));
        }
        let polls = [
            ("timing.home_poll_interval", self.timing.home_poll_interval),
            ("timing.move_poll_interval", self.timing.move_poll_interval),
        ];
        for (name, interval) in polls {
            if interval.is_zero() || interval > Duration::from_millis(100) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within (0, 100ms], got {interval:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
