//! Modbus RTU framing and serial transport.
//!
//! Provides Modbus RTU client functionality for gateway register access:
//! - Read Holding Registers (Function 0x03)
//! - Write Multiple Registers (Function 0x10)
//!
//! Frames carry a CRC16 (polynomial 0xA001 reflected, initial value 0xFFFF)
//! appended low byte first. Register values are big-endian on the wire.

use crate::{Address, TagValue, Transport};
use ec_common::error::{ActuatorError, EcResult};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Maximum registers per read request.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum registers per write request.
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Exception responses set the high bit of the function code.
const EXCEPTION_FLAG: u8 = 0x80;

/// Default wait for a complete response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// An open serial line.
pub type SerialLine = Box<dyn SerialPort>;

/// Compute the Modbus CRC16 of `data`.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC of `frame` to it, low byte first.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Copy `payload` and append its CRC.
#[must_use]
pub fn with_crc(payload: &[u8]) -> Vec<u8> {
    let mut frame = payload.to_vec();
    append_crc(&mut frame);
    frame
}

/// Check the trailing CRC of a frame.
#[must_use]
pub fn verify_crc(frame: &[u8]) -> bool {
    check_crc(frame).is_ok()
}

/// Check the trailing CRC of a frame and return the body without it.
pub fn check_crc(frame: &[u8]) -> EcResult<&[u8]> {
    if frame.len() < 2 {
        return Err(ActuatorError::TransportFailure(format!(
            "frame too short for CRC: {} bytes",
            frame.len()
        )));
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    let computed = crc16(body);
    if received == computed {
        Ok(body)
    } else {
        Err(ActuatorError::CrcMismatch { received, computed })
    }
}

/// Modbus function codes used by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Holding Registers (0x03).
    ReadHoldingRegisters = 0x03,
    /// Write Multiple Registers (0x10).
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    /// Parse a function code from a byte value.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x03 => Some(Self::ReadHoldingRegisters),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }
}

/// Modbus exception codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Illegal function code.
    IllegalFunction = 0x01,
    /// Illegal data address.
    IllegalDataAddress = 0x02,
    /// Illegal data value.
    IllegalDataValue = 0x03,
    /// Server device failure.
    ServerDeviceFailure = 0x04,
    /// Acknowledge (request accepted, processing).
    Acknowledge = 0x05,
    /// Server device busy.
    ServerDeviceBusy = 0x06,
    /// Gateway path unavailable.
    GatewayPathUnavailable = 0x0A,
    /// Gateway target device failed to respond.
    GatewayTargetFailed = 0x0B,
}

impl ExceptionCode {
    /// Parse an exception code from a byte value.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::ServerDeviceFailure),
            0x05 => Some(Self::Acknowledge),
            0x06 => Some(Self::ServerDeviceBusy),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "Illegal Function"),
            Self::IllegalDataAddress => write!(f, "Illegal Data Address"),
            Self::IllegalDataValue => write!(f, "Illegal Data Value"),
            Self::ServerDeviceFailure => write!(f, "Server Device Failure"),
            Self::Acknowledge => write!(f, "Acknowledge"),
            Self::ServerDeviceBusy => write!(f, "Server Device Busy"),
            Self::GatewayPathUnavailable => write!(f, "Gateway Path Unavailable"),
            Self::GatewayTargetFailed => write!(f, "Gateway Target Failed"),
        }
    }
}

fn short_frame(what: &str, len: usize) -> ActuatorError {
    ActuatorError::TransportFailure(format!("{what} frame malformed: {len} bytes"))
}

fn be_words(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// A request frame sent to a slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtuRequest {
    /// Read `count` holding registers starting at `address`.
    ReadHoldingRegisters {
        /// Slave address.
        slave: u8,
        /// First register.
        address: u16,
        /// Number of registers.
        count: u16,
    },
    /// Write `values` to consecutive registers starting at `address`.
    WriteMultipleRegisters {
        /// Slave address.
        slave: u8,
        /// First register.
        address: u16,
        /// Register values.
        values: Vec<u16>,
    },
}

impl RtuRequest {
    /// Slave address of the request.
    #[must_use]
    pub fn slave(&self) -> u8 {
        match self {
            Self::ReadHoldingRegisters { slave, .. } | Self::WriteMultipleRegisters { slave, .. } => {
                *slave
            }
        }
    }

    /// Function code of the request.
    #[must_use]
    pub fn function(&self) -> FunctionCode {
        match self {
            Self::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Self::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// Check register counts against protocol limits.
    pub fn validate(&self) -> EcResult<()> {
        let (count, max) = match self {
            Self::ReadHoldingRegisters { count, .. } => (usize::from(*count), MAX_READ_REGISTERS),
            Self::WriteMultipleRegisters { values, .. } => (values.len(), MAX_WRITE_REGISTERS),
        };
        if count == 0 || count > usize::from(max) {
            return Err(ActuatorError::InvalidArgument(format!(
                "register count {count} outside [1, {max}]"
            )));
        }
        Ok(())
    }

    /// Encode the request with its CRC.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(16);
        frame.push(self.slave());
        frame.push(self.function() as u8);
        match self {
            Self::ReadHoldingRegisters { address, count, .. } => {
                frame.extend_from_slice(&address.to_be_bytes());
                frame.extend_from_slice(&count.to_be_bytes());
            }
            Self::WriteMultipleRegisters {
                address, values, ..
            } => {
                // validate() bounds values.len() to MAX_WRITE_REGISTERS
                let count = values.len() as u16;
                frame.extend_from_slice(&address.to_be_bytes());
                frame.extend_from_slice(&count.to_be_bytes());
                frame.push((values.len() * 2) as u8);
                for value in values {
                    frame.extend_from_slice(&value.to_be_bytes());
                }
            }
        }
        append_crc(&mut frame);
        frame
    }

    /// Decode and CRC-check a request frame.
    pub fn decode(frame: &[u8]) -> EcResult<Self> {
        let body = check_crc(frame)?;
        if body.len() < 6 {
            return Err(short_frame("request", frame.len()));
        }
        let slave = body[0];
        let address = u16::from_be_bytes([body[2], body[3]]);
        let count = u16::from_be_bytes([body[4], body[5]]);
        match FunctionCode::from_byte(body[1]) {
            Some(FunctionCode::ReadHoldingRegisters) if body.len() == 6 => {
                Ok(Self::ReadHoldingRegisters {
                    slave,
                    address,
                    count,
                })
            }
            Some(FunctionCode::WriteMultipleRegisters) => {
                let byte_count = body.get(6).copied().map(usize::from);
                let data = &body[body.len().min(7)..];
                if byte_count != Some(data.len()) || data.len() != usize::from(count) * 2 {
                    return Err(short_frame("write request", frame.len()));
                }
                Ok(Self::WriteMultipleRegisters {
                    slave,
                    address,
                    values: be_words(data),
                })
            }
            Some(FunctionCode::ReadHoldingRegisters) => Err(short_frame("read request", frame.len())),
            None => Err(ActuatorError::TransportFailure(format!(
                "unsupported function 0x{:02X}",
                body[1]
            ))),
        }
    }
}

/// A response frame returned by a slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtuResponse {
    /// Register values answering a read.
    Registers {
        /// Slave address.
        slave: u8,
        /// Register values.
        values: Vec<u16>,
    },
    /// Acknowledgement of a multi-register write.
    WriteAck {
        /// Slave address.
        slave: u8,
        /// First register written.
        address: u16,
        /// Number of registers written.
        count: u16,
    },
    /// Exception response.
    Exception {
        /// Slave address.
        slave: u8,
        /// Function code of the failed request (without the exception flag).
        function: u8,
        /// Exception code.
        code: u8,
    },
}

impl RtuResponse {
    /// Slave address of the response.
    #[must_use]
    pub fn slave(&self) -> u8 {
        match self {
            Self::Registers { slave, .. }
            | Self::WriteAck { slave, .. }
            | Self::Exception { slave, .. } => *slave,
        }
    }

    /// Encode the response with its CRC.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(16);
        match self {
            Self::Registers { slave, values } => {
                frame.push(*slave);
                frame.push(FunctionCode::ReadHoldingRegisters as u8);
                frame.push((values.len() * 2) as u8);
                for value in values {
                    frame.extend_from_slice(&value.to_be_bytes());
                }
            }
            Self::WriteAck {
                slave,
                address,
                count,
            } => {
                frame.push(*slave);
                frame.push(FunctionCode::WriteMultipleRegisters as u8);
                frame.extend_from_slice(&address.to_be_bytes());
                frame.extend_from_slice(&count.to_be_bytes());
            }
            Self::Exception {
                slave,
                function,
                code,
            } => {
                frame.push(*slave);
                frame.push(function | EXCEPTION_FLAG);
                frame.push(*code);
            }
        }
        append_crc(&mut frame);
        frame
    }

    /// Decode and CRC-check a response frame.
    pub fn decode(frame: &[u8]) -> EcResult<Self> {
        let body = check_crc(frame)?;
        if body.len() < 3 {
            return Err(short_frame("response", frame.len()));
        }
        let slave = body[0];
        let function = body[1];

        if function & EXCEPTION_FLAG != 0 {
            return if body.len() == 3 {
                Ok(Self::Exception {
                    slave,
                    function: function & !EXCEPTION_FLAG,
                    code: body[2],
                })
            } else {
                Err(short_frame("exception", frame.len()))
            };
        }

        match FunctionCode::from_byte(function) {
            Some(FunctionCode::ReadHoldingRegisters) => {
                let data = &body[3..];
                if usize::from(body[2]) != data.len() || data.len() % 2 != 0 {
                    return Err(short_frame("read response", frame.len()));
                }
                Ok(Self::Registers {
                    slave,
                    values: be_words(data),
                })
            }
            Some(FunctionCode::WriteMultipleRegisters) if body.len() == 6 => Ok(Self::WriteAck {
                slave,
                address: u16::from_be_bytes([body[2], body[3]]),
                count: u16::from_be_bytes([body[4], body[5]]),
            }),
            Some(FunctionCode::WriteMultipleRegisters) => {
                Err(short_frame("write response", frame.len()))
            }
            None => Err(ActuatorError::TransportFailure(format!(
                "unsupported function 0x{function:02X}"
            ))),
        }
    }

    /// Check that this response answers `request`.
    ///
    /// Exception responses become [`ActuatorError::ModbusException`].
    pub fn check_against(&self, request: &RtuRequest) -> EcResult<()> {
        if self.slave() != request.slave() {
            return Err(ActuatorError::TransportFailure(format!(
                "slave mismatch: expected {}, got {}",
                request.slave(),
                self.slave()
            )));
        }
        match (self, request) {
            (Self::Exception { function, code, .. }, _) => {
                let name = ExceptionCode::from_byte(*code)
                    .map_or_else(|| format!("Unknown (0x{code:02X})"), |e| e.to_string());
                Err(ActuatorError::ModbusException(format!(
                    "{name} for function 0x{function:02X}"
                )))
            }
            (Self::Registers { values, .. }, RtuRequest::ReadHoldingRegisters { count, .. }) => {
                if values.len() == usize::from(*count) {
                    Ok(())
                } else {
                    Err(ActuatorError::TransportFailure(format!(
                        "expected {count} registers, got {}",
                        values.len()
                    )))
                }
            }
            (
                Self::WriteAck { address, count, .. },
                RtuRequest::WriteMultipleRegisters {
                    address: requested,
                    values,
                    ..
                },
            ) => {
                if address == requested && usize::from(*count) == values.len() {
                    Ok(())
                } else {
                    Err(ActuatorError::TransportFailure(format!(
                        "write echo mismatch: {count} registers at {address}"
                    )))
                }
            }
            _ => Err(ActuatorError::TransportFailure(
                "function code mismatch".into(),
            )),
        }
    }
}

type Opener<S> = Box<dyn FnMut() -> io::Result<S> + Send>;

/// Fill `buf` from `port`, failing with `TimedOut` once `deadline` passes.
///
/// Timed-out reads of the stream itself are retried until the deadline, so
/// the stream's read timeout only bounds how late the deadline is noticed.
fn read_full<S: Read>(port: &mut S, mut buf: &mut [u8], deadline: Instant) -> io::Result<()> {
    while !buf.is_empty() {
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no response, {} bytes missing", buf.len()),
            ));
        }
        match port.read(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "line closed mid-frame",
                ))
            }
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Modbus RTU transport over any byte stream.
///
/// Word addresses map to single holding registers. Tag addresses are not
/// addressable over RTU and always fail.
///
/// The stream must have a read timeout (as [`ModbusRtuTransport::serial`]
/// configures) so that a silent slave fails the exchange after the
/// response timeout instead of blocking the caller. A failed exchange
/// closes the stream; the next `connect` reopens it.
pub struct ModbusRtuTransport<S> {
    /// Device description for logs.
    peer: String,
    /// Slave address.
    slave_id: u8,
    /// Opens the byte stream on connect.
    opener: Opener<S>,
    /// Open stream (None if disconnected).
    port: Option<S>,
    /// Longest wait for a complete response.
    response_timeout: Duration,
}

impl ModbusRtuTransport<SerialLine> {
    /// Transport over the serial device at `path`, opened 8N1 at
    /// `baud_rate` on connect.
    pub fn serial(
        path: impl Into<String>,
        baud_rate: u32,
        slave_id: u8,
        response_timeout: Duration,
    ) -> Self {
        let path = path.into();
        let peer = format!("{path} @ {baud_rate} baud");
        let opener = move || {
            serialport::new(path.as_str(), baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(response_timeout)
                .open()
                .map_err(io::Error::from)
        };
        Self::new(peer, slave_id, opener).with_response_timeout(response_timeout)
    }
}

impl<S: Read + Write + Send> ModbusRtuTransport<S> {
    /// Create a transport that opens its stream with `opener` on connect.
    pub fn new<F>(peer: impl Into<String>, slave_id: u8, opener: F) -> Self
    where
        F: FnMut() -> io::Result<S> + Send + 'static,
    {
        Self {
            peer: peer.into(),
            slave_id,
            opener: Box::new(opener),
            port: None,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Set the longest wait for a complete response.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Slave address used for requests.
    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    /// Send a request and receive the validated response.
    pub fn transact(&mut self, request: &RtuRequest) -> EcResult<RtuResponse> {
        request.validate()?;
        let frame = request.encode();
        trace!(len = frame.len(), function = ?request.function(), "Sending RTU request");

        let result = self.exchange(&frame);
        let response_frame = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                // Stream state is unknown after an I/O error
                self.port = None;
                return Err(ActuatorError::TransportFailure(format!(
                    "{}: {e}",
                    self.peer
                )));
            }
        };

        let response = RtuResponse::decode(&response_frame)?;
        response.check_against(request)?;
        trace!(len = response_frame.len(), "Received RTU response");
        Ok(response)
    }

    fn exchange(&mut self, frame: &[u8]) -> io::Result<Vec<u8>> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port not open"))?;

        port.write_all(frame)?;
        port.flush()?;
        let deadline = Instant::now() + self.response_timeout;

        let mut response = vec![0u8; 2];
        read_full(port, &mut response, deadline)?;

        // Remaining length depends on the function code
        let remaining = if response[1] & EXCEPTION_FLAG != 0 {
            3
        } else if response[1] == FunctionCode::ReadHoldingRegisters as u8 {
            let mut byte_count = [0u8; 1];
            read_full(port, &mut byte_count, deadline)?;
            response.push(byte_count[0]);
            usize::from(byte_count[0]) + 2
        } else {
            6
        };

        let start = response.len();
        response.resize(start + remaining, 0);
        read_full(port, &mut response[start..], deadline)?;
        Ok(response)
    }

    /// Read `count` holding registers.
    pub fn read_registers(&mut self, address: u16, count: u16) -> EcResult<Vec<u16>> {
        let request = RtuRequest::ReadHoldingRegisters {
            slave: self.slave_id,
            address,
            count,
        };
        match self.transact(&request)? {
            RtuResponse::Registers { values, .. } => Ok(values),
            other => Err(ActuatorError::TransportFailure(format!(
                "unexpected response {other:?}"
            ))),
        }
    }

    /// Write consecutive holding registers.
    pub fn write_registers(&mut self, address: u16, values: &[u16]) -> EcResult<()> {
        let request = RtuRequest::WriteMultipleRegisters {
            slave: self.slave_id,
            address,
            values: values.to_vec(),
        };
        self.transact(&request).map(|_| ())
    }
}

impl<S: Read + Write + Send> Transport for ModbusRtuTransport<S> {
    fn connect(&mut self) -> bool {
        if self.port.is_some() {
            return true;
        }
        info!(peer = %self.peer, slave = self.slave_id, "Opening Modbus RTU port");
        match (self.opener)() {
            Ok(port) => {
                self.port = Some(port);
                true
            }
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Failed to open Modbus RTU port");
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if self.port.take().is_some() {
            debug!(peer = %self.peer, "Closed Modbus RTU port");
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, address: &Address) -> Option<TagValue> {
        let Address::Word(register) = *address else {
            warn!(%address, "Tag addresses are not supported over Modbus RTU");
            return None;
        };
        match self.read_registers(register, 1) {
            Ok(values) => values.first().copied().map(TagValue::Word),
            Err(e) => {
                warn!(%address, error = %e, "Modbus RTU read failed");
                None
            }
        }
    }

    fn write(&mut self, address: &Address, value: TagValue) -> bool {
        let Address::Word(register) = *address else {
            warn!(%address, "Tag addresses are not supported over Modbus RTU");
            return false;
        };
        let Some(word) = value.as_word() else {
            warn!(%address, ?value, "Value does not fit a holding register");
            return false;
        };
        match self.write_registers(register, &[word]) {
            Ok(()) => true,
            Err(e) => {
                warn!(%address, error = %e, "Modbus RTU write failed");
                false
            }
        }
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}
