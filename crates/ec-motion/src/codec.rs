//! Bit-field codec for gateway control and status words.
//!
//! Control word: one 16-bit word per unit, four bits per axis
//! (`bit = axis * 4 + offset`, offsets ST0 = 0, ST1 = 1, RES = 2).
//!
//! Axis status word: bit0 ready, bit1 busy, bit2 done, bit3 alarm,
//! bit4 error, bit5 backward end (LS0/PE0), bit6 forward end (LS1/PE1).
//! The low byte doubles as a raw position counter and the high byte as a
//! status code; the position has no defined scale.

use crate::signals::Direction;
use serde::Serialize;
use std::fmt;

/// Axes per gateway unit.
pub const AXES_PER_UNIT: u8 = 4;

/// Control bits reserved per axis.
pub const BITS_PER_AXIS: u8 = 4;

/// Command bits within an axis group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisCommand {
    /// Backward / home.
    St0,
    /// Forward.
    St1,
    /// Alarm reset.
    Res,
}

impl AxisCommand {
    /// Every command bit.
    pub const ALL: [AxisCommand; 3] = [AxisCommand::St0, AxisCommand::St1, AxisCommand::Res];

    /// Bit offset within the axis group.
    #[must_use]
    pub fn offset(self) -> u8 {
        match self {
            Self::St0 => 0,
            Self::St1 => 1,
            Self::Res => 2,
        }
    }

    /// Command that drives `direction`.
    #[must_use]
    pub fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::Backward => Self::St0,
            Direction::Forward => Self::St1,
        }
    }
}

impl fmt::Display for AxisCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::St0 => write!(f, "ST0"),
            Self::St1 => write!(f, "ST1"),
            Self::Res => write!(f, "RES"),
        }
    }
}

/// Mask of the control bit for `axis` and `command`.
///
/// Axes beyond the word yield an empty mask.
#[must_use]
pub fn command_mask(axis: u8, command: AxisCommand) -> u16 {
    let bit = u32::from(axis) * u32::from(BITS_PER_AXIS) + u32::from(command.offset());
    1u16.checked_shl(bit).unwrap_or(0)
}

/// Set or clear one command bit, leaving every other bit unchanged.
#[must_use]
pub fn encode_command(word: u16, axis: u8, command: AxisCommand, value: bool) -> u16 {
    let mask = command_mask(axis, command);
    if value {
        word | mask
    } else {
        word & !mask
    }
}

/// Read one command bit back from a control word.
#[must_use]
pub fn decode_command(word: u16, axis: u8, command: AxisCommand) -> bool {
    let mask = command_mask(axis, command);
    mask != 0 && word & mask == mask
}

/// Decoded axis status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AxisStatus {
    /// Raw word as read.
    pub raw: u16,
    /// Axis ready.
    pub ready: bool,
    /// Motion in progress.
    pub busy: bool,
    /// Last command completed.
    pub done: bool,
    /// Alarm present.
    pub alarm: bool,
    /// Error present.
    pub error: bool,
    /// Backward end reached (LS0/PE0).
    pub backward_end: bool,
    /// Forward end reached (LS1/PE1).
    pub forward_end: bool,
    /// Raw position counter (low byte, unscaled).
    pub position: u8,
    /// Status code (high byte).
    pub status_code: u8,
}

impl AxisStatus {
    /// Decode a status word.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode(raw: u16) -> Self {
        Self {
            raw,
            ready: raw & 0x0001 != 0,
            busy: raw & 0x0002 != 0,
            done: raw & 0x0004 != 0,
            alarm: raw & 0x0008 != 0,
            error: raw & 0x0010 != 0,
            backward_end: raw & 0x0020 != 0,
            forward_end: raw & 0x0040 != 0,
            position: (raw & 0x00FF) as u8,
            status_code: (raw >> 8) as u8,
        }
    }

    /// Whether the end in `direction` was reached.
    #[must_use]
    pub fn end_reached(&self, direction: Direction) -> bool {
        match direction {
            Direction::Backward => self.backward_end,
            Direction::Forward => self.forward_end,
        }
    }
}

/// Gateway operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayMode {
    /// Driven over the fieldbus.
    Auto,
    /// Driven from the teaching pendant.
    Manual,
}

/// Decoded gateway status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    /// Raw word as read.
    pub raw: u16,
    /// Alarm present (bit 15 clear).
    pub alarm: bool,
    /// Operating mode (bit 13).
    pub mode: GatewayMode,
    /// Emergency stop active (bit 12).
    pub emergency_stop: bool,
    /// Alarm code (low byte).
    pub alarm_code: u8,
}

impl GatewayStatus {
    /// Decode a gateway status word.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode(raw: u16) -> Self {
        Self {
            raw,
            alarm: raw & 0x8000 == 0,
            mode: if raw & 0x2000 != 0 {
                GatewayMode::Manual
            } else {
                GatewayMode::Auto
            },
            emergency_stop: raw & 0x1000 != 0,
            alarm_code: (raw & 0x00FF) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bit_table() {
        // (axis, command, expected word from zero)
        let table = [
            (0, AxisCommand::St0, 0x0001),
            (0, AxisCommand::St1, 0x0002),
            (0, AxisCommand::Res, 0x0004),
            (1, AxisCommand::St0, 0x0010),
            (1, AxisCommand::St1, 0x0020),
            (1, AxisCommand::Res, 0x0040),
            (2, AxisCommand::St0, 0x0100),
            (2, AxisCommand::St1, 0x0200),
            (2, AxisCommand::Res, 0x0400),
            (3, AxisCommand::St0, 0x1000),
            (3, AxisCommand::St1, 0x2000),
            (3, AxisCommand::Res, 0x4000),
        ];
        for (axis, command, expected) in table {
            let word = encode_command(0, axis, command, true);
            assert_eq!(word, expected, "axis {axis} {command}");
            assert!(decode_command(word, axis, command));
            for other in AxisCommand::ALL.into_iter().filter(|c| *c != command) {
                assert!(!decode_command(word, axis, other), "axis {axis} {other}");
            }
            assert_eq!(encode_command(0xFFFF, axis, command, false), !expected);
        }
    }

    #[test]
    fn test_encode_preserves_sibling_axes() {
        let word = encode_command(0, 0, AxisCommand::St1, true);
        let word = encode_command(word, 3, AxisCommand::Res, true);
        let word = encode_command(word, 0, AxisCommand::St1, false);
        assert_eq!(word, 0x4000);
    }

    #[test]
    fn test_out_of_range_axis_is_inert() {
        assert_eq!(command_mask(4, AxisCommand::St0), 0);
        assert_eq!(encode_command(0x1234, 9, AxisCommand::St1, true), 0x1234);
        assert!(!decode_command(0xFFFF, 4, AxisCommand::St0));
    }

    #[test]
    fn test_axis_status_decode() {
        let status = AxisStatus::decode(0x1265);
        assert!(status.ready);
        assert!(!status.busy);
        assert!(status.done);
        assert!(!status.alarm);
        assert!(status.backward_end);
        assert!(status.forward_end);
        assert_eq!(status.position, 0x65);
        assert_eq!(status.status_code, 0x12);
        assert!(status.end_reached(Direction::Forward));
        assert!(AxisStatus::decode(0x0008).alarm);
    }

    #[test]
    fn test_gateway_status_decode() {
        let ok = GatewayStatus::decode(0x8000);
        assert!(!ok.alarm);
        assert_eq!(ok.mode, GatewayMode::Auto);
        assert!(!ok.emergency_stop);

        let fault = GatewayStatus::decode(0x3042);
        assert!(fault.alarm);
        assert_eq!(fault.mode, GatewayMode::Manual);
        assert!(fault.emergency_stop);
        assert_eq!(fault.alarm_code, 0x42);
    }
}
