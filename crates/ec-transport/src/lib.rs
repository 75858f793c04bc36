//! Tag/register transport abstractions for actuator controllers.
//!
//! This crate provides:
//! - [`Transport`] trait for abstracting controller communication
//! - [`SharedTransport`] handle that serializes access across threads
//! - [`sim`] module with an in-memory simulated controller
//! - [`modbus`] module with Modbus RTU framing and a serial transport
//!
//! The EtherNet/IP (CIP) driver is an external collaborator; it plugs in by
//! implementing [`Transport`] for tag addresses.

pub mod modbus;
pub mod sim;

pub use modbus::*;
pub use sim::*;

use ec_common::error::{ActuatorError, EcResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Transport address: a symbolic CIP tag or a 16-bit word offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    /// Named tag, e.g. `Controller.ST0`.
    Tag(String),
    /// Word offset (gateway byte-area word or Modbus holding register).
    Word(u16),
}

impl Address {
    /// Build a tag address.
    pub fn tag(name: impl Into<String>) -> Self {
        Self::Tag(name.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(name) => write!(f, "{name}"),
            Self::Word(offset) => write!(f, "W{offset}"),
        }
    }
}

/// A value read from or written to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Boolean signal.
    Bool(bool),
    /// Integer parameter.
    Int(i64),
    /// Floating-point parameter.
    Real(f64),
    /// Raw 16-bit word.
    Word(u16),
}

impl TagValue {
    /// Interpret the value as a boolean (non-zero is true).
    #[must_use]
    pub fn as_bool(&self) -> bool {
        match *self {
            Self::Bool(b) => b,
            Self::Int(i) => i != 0,
            Self::Real(r) => r != 0.0,
            Self::Word(w) => w != 0,
        }
    }

    /// Interpret the value as a float.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Bool(b) => f64::from(u8::from(b)),
            Self::Int(i) => i as f64,
            Self::Real(r) => r,
            Self::Word(w) => f64::from(w),
        }
    }

    /// Interpret the value as a 16-bit word, if it fits.
    #[must_use]
    pub fn as_word(&self) -> Option<u16> {
        match *self {
            Self::Bool(b) => Some(u16::from(b)),
            Self::Int(i) => u16::try_from(i).ok(),
            Self::Real(_) => None,
            Self::Word(w) => Some(w),
        }
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u16> for TagValue {
    fn from(value: u16) -> Self {
        Self::Word(value)
    }
}

/// Controller transport abstraction.
///
/// Failures are reported as `None`/`false`, never as panics; the caller
/// decides whether to retry or abort. Implementations are not required to
/// be re-entrant, so shared use goes through [`SharedTransport`].
pub trait Transport: Send {
    /// Open the connection. Returns true on success.
    fn connect(&mut self) -> bool;

    /// Close the connection. Idempotent.
    fn disconnect(&mut self);

    /// Check if the connection is open.
    fn is_connected(&self) -> bool;

    /// Read one value. `None` signals a failed read.
    fn read(&mut self, address: &Address) -> Option<TagValue>;

    /// Write one value. `false` signals a failed write.
    fn write(&mut self, address: &Address, value: TagValue) -> bool;

    /// Human-readable peer description, e.g. an IP address or device path.
    fn peer(&self) -> String {
        String::from("unknown")
    }
}

/// Thread-safe handle to a transport owned by one controller.
///
/// Every call locks the transport for its duration, so a background monitor
/// and a foreground motion call never interleave within a single read or
/// write. Multi-step sequences that must be atomic (control-word
/// read-modify-write) need their own lock on top.
#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<Mutex<Box<dyn Transport>>>,
}

impl fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTransport")
            .field("peer", &self.peer())
            .finish()
    }
}

impl SharedTransport {
    /// Wrap a transport.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(transport))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        // A panic while holding the lock leaves the transport itself intact
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the connection.
    pub fn connect(&self) -> bool {
        self.lock().connect()
    }

    /// Close the connection.
    pub fn disconnect(&self) {
        self.lock().disconnect();
    }

    /// Check if the connection is open.
    pub fn is_connected(&self) -> bool {
        self.lock().is_connected()
    }

    /// Peer description.
    pub fn peer(&self) -> String {
        self.lock().peer()
    }

    /// Raw read.
    pub fn read(&self, address: &Address) -> Option<TagValue> {
        self.lock().read(address)
    }

    /// Raw write.
    pub fn write(&self, address: &Address, value: TagValue) -> bool {
        self.lock().write(address, value)
    }

    /// Read a value, mapping a failed read to [`ActuatorError::TransportFailure`].
    pub fn read_value(&self, address: &Address) -> EcResult<TagValue> {
        let value = self
            .read(address)
            .ok_or_else(|| ActuatorError::TransportFailure(format!("read {address} failed")))?;
        trace!(%address, ?value, "read");
        Ok(value)
    }

    /// Read a boolean signal.
    pub fn read_bool(&self, address: &Address) -> EcResult<bool> {
        self.read_value(address).map(|v| v.as_bool())
    }

    /// Read a numeric parameter.
    pub fn read_f64(&self, address: &Address) -> EcResult<f64> {
        self.read_value(address).map(|v| v.as_f64())
    }

    /// Read a raw word.
    pub fn read_word(&self, address: &Address) -> EcResult<u16> {
        let value = self.read_value(address)?;
        value.as_word().ok_or_else(|| {
            ActuatorError::TransportFailure(format!("{address} holds non-word value {value:?}"))
        })
    }

    /// Write a value, mapping a failed write to [`ActuatorError::TransportFailure`].
    pub fn write_value(&self, address: &Address, value: impl Into<TagValue>) -> EcResult<()> {
        let value = value.into();
        trace!(%address, ?value, "write");
        if self.write(address, value) {
            Ok(())
        } else {
            Err(ActuatorError::TransportFailure(format!(
                "write {address} = {value:?} failed"
            )))
        }
    }
}
