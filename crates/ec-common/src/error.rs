use std::time::Duration;
use thiserror::Error;

/// Actuator error types covering validation, motion outcomes and transport failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActuatorError {
    /// The transport is not connected.
    #[error("not connected to the controller")]
    NotConnected,

    /// A position, speed, force or parameter value is outside its configured range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The controller raised an alarm while a motion was in progress.
    #[error("alarm raised during {operation}")]
    AlarmDuringMotion {
        /// Motion that was interrupted.
        operation: String,
    },

    /// The completion signal did not arrive before the deadline.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// Motion that timed out.
        operation: String,
        /// Time spent polling before giving up.
        elapsed: Duration,
    },

    /// A read or write returned failure mid-sequence.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// A serial frame failed its CRC check.
    #[error("CRC mismatch: frame carries 0x{received:04X}, computed 0x{computed:04X}")]
    CrcMismatch {
        /// CRC carried by the frame.
        received: u16,
        /// CRC computed over the frame body.
        computed: u16,
    },

    /// The slave answered with a Modbus exception response.
    #[error("Modbus exception: {0}")]
    ModbusException(String),

    /// A command line could not be interpreted.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The wait was interrupted by `stop()`.
    #[error("{operation} cancelled by stop")]
    Cancelled {
        /// Motion that was cancelled.
        operation: String,
    },

    /// The alarm was still present after a reset pulse.
    #[error("alarm still active after reset")]
    AlarmNotCleared,

    /// Reading or writing a local file (e.g. a parameter backup) failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid axis state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl ActuatorError {
    /// Returns true if the error was raised before any hardware write.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::UnknownCommand(_) | Self::NotConnected
        )
    }
}

/// Convenience type alias for actuator operations.
pub type EcResult<T> = Result<T, ActuatorError>;
