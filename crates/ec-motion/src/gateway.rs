//! Multi-axis gateway access over packed words.
//!
//! Axes behind a gateway share one control word per unit. Every mutation is
//! a read-modify-write of that word, serialized by a per-unit lock so that
//! concurrent commands to sibling axes never overwrite each other's bits.

use crate::codec::{self, AxisCommand, AxisStatus, GatewayStatus, AXES_PER_UNIT};
use ec_common::config::GatewayConfig;
use ec_common::error::{ActuatorError, EcResult};
use ec_transport::{Address, SharedTransport};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Position of an axis behind the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AxisId {
    unit: u8,
    axis: u8,
}

impl AxisId {
    /// Validate `axis < 4` and `unit < unit_count`.
    pub fn new(unit: u8, axis: u8, layout: &GatewayConfig) -> EcResult<Self> {
        if axis >= AXES_PER_UNIT {
            return Err(ActuatorError::InvalidArgument(format!(
                "axis index {axis} outside [0, {}]",
                AXES_PER_UNIT - 1
            )));
        }
        if unit >= layout.unit_count {
            return Err(ActuatorError::InvalidArgument(format!(
                "unit index {unit} outside [0, {})",
                layout.unit_count
            )));
        }
        Ok(Self { unit, axis })
    }

    /// Unit index.
    #[must_use]
    pub fn unit(&self) -> u8 {
        self.unit
    }

    /// Axis index within the unit.
    #[must_use]
    pub fn axis(&self) -> u8 {
        self.axis
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit{}/axis{}", self.unit, self.axis)
    }
}

/// Register access to a gateway and the axes behind it.
pub struct Gateway {
    transport: SharedTransport,
    layout: GatewayConfig,
    unit_locks: Vec<Mutex<()>>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("transport", &self.transport)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway over `transport` with the given word layout.
    #[must_use]
    pub fn new(transport: SharedTransport, layout: GatewayConfig) -> Self {
        let unit_locks = (0..layout.unit_count).map(|_| Mutex::new(())).collect();
        Self {
            transport,
            layout,
            unit_locks,
        }
    }

    /// Shared transport.
    #[must_use]
    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    /// Word layout.
    #[must_use]
    pub fn layout(&self) -> &GatewayConfig {
        &self.layout
    }

    /// Every axis of every configured unit.
    #[must_use]
    pub fn axes(&self) -> Vec<AxisId> {
        (0..self.layout.unit_count)
            .flat_map(|unit| (0..AXES_PER_UNIT).map(move |axis| AxisId { unit, axis }))
            .collect()
    }

    /// Address of a unit's control word.
    #[must_use]
    pub fn control_address(&self, unit: u8) -> Address {
        Address::Word(
            self.layout
                .control_base
                .wrapping_add(u16::from(unit).wrapping_mul(self.layout.control_stride)),
        )
    }

    /// Address of an axis status word.
    #[must_use]
    pub fn axis_status_address(&self, id: AxisId) -> Address {
        Address::Word(
            self.layout
                .axis_status_base
                .wrapping_add(u16::from(id.unit).wrapping_mul(self.layout.axis_status_unit_stride))
                .wrapping_add(u16::from(id.axis).wrapping_mul(self.layout.axis_status_axis_stride)),
        )
    }

    fn lock_unit(&self, unit: u8) -> EcResult<MutexGuard<'_, ()>> {
        let lock = self.unit_locks.get(usize::from(unit)).ok_or_else(|| {
            ActuatorError::InvalidArgument(format!("unit {unit} is not configured"))
        })?;
        Ok(lock.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Read a unit's control word, apply `update` and write the result back,
    /// holding the unit lock across both accesses. Returns `(before, after)`.
    ///
    /// A failed read aborts with [`ActuatorError::TransportFailure`] and
    /// writes nothing.
    pub fn update_control_word<F>(&self, unit: u8, update: F) -> EcResult<(u16, u16)>
    where
        F: FnOnce(u16) -> u16,
    {
        let _unit = self.lock_unit(unit)?;
        let address = self.control_address(unit);

        let current = self.transport.read_word(&address)?;
        let updated = update(current);
        self.transport.write_value(&address, updated)?;
        Ok((current, updated))
    }

    /// Set or clear one command bit and return the word written.
    pub fn send_command(&self, id: AxisId, command: AxisCommand, value: bool) -> EcResult<u16> {
        let (before, after) = self.update_control_word(id.unit, |word| {
            codec::encode_command(word, id.axis, command, value)
        })?;

        trace!(
            axis = %id,
            %command,
            value,
            before = format_args!("{before:#06x}"),
            after = format_args!("{after:#06x}"),
            "Control word updated"
        );
        Ok(after)
    }

    /// Read and decode an axis status word.
    pub fn read_axis_status(&self, id: AxisId) -> EcResult<AxisStatus> {
        let raw = self.transport.read_word(&self.axis_status_address(id))?;
        Ok(AxisStatus::decode(raw))
    }

    /// Read and decode the gateway status word.
    pub fn read_gateway_status(&self) -> EcResult<GatewayStatus> {
        let raw = self
            .transport
            .read_word(&Address::Word(self.layout.status_offset))?;
        let status = GatewayStatus::decode(raw);
        if status.emergency_stop {
            debug!(raw = format_args!("{raw:#06x}"), "Gateway reports emergency stop");
        }
        Ok(status)
    }

    /// Read the status of every configured axis. Axes whose read fails are
    /// reported with the error.
    pub fn read_all_axes(&self) -> Vec<(AxisId, EcResult<AxisStatus>)> {
        self.axes()
            .into_iter()
            .map(|id| (id, self.read_axis_status(id)))
            .collect()
    }
}
