//! Mock Modbus RTU slave for integration testing.
//!
//! Provides an in-memory serial line: each [`MockPort`] opened from a
//! [`MockSerialSlave`] parses request frames on flush and queues the slave's
//! response for the following reads, with controllable fault injection.
//!
//! # Example
//!
//! ```ignore
//! use mock_serial_slave::{MockSerialSlave, SlaveBehavior};
//!
//! let slave = MockSerialSlave::new(1);
//! let opener = slave.opener();
//! // Pass `opener` to ModbusRtuTransport::new and run tests
//! ```

#![allow(dead_code)]

use ec_transport::{crc16, RtuRequest, RtuResponse};
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Read timeout of a [`MockPort`] with nothing to deliver.
pub const LINE_TIMEOUT: Duration = Duration::from_millis(2);

/// Mock slave behavior modes for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveBehavior {
    /// Answer normally.
    Normal,
    /// Never answer (reads time out).
    Silent,
    /// Answer with a corrupted CRC.
    CorruptCrc,
    /// Answer every request with this exception code.
    Exception(u8),
    /// Answer as a different slave address.
    WrongSlave,
}

/// Called after every accepted register write with the register map, the
/// address and the value written.
pub type WriteHook = Box<dyn Fn(&mut BTreeMap<u16, u16>, u16, u16) + Send>;

struct SlaveState {
    behavior: SlaveBehavior,
    registers: BTreeMap<u16, u16>,
    requests: Vec<RtuRequest>,
    hook: Option<WriteHook>,
    opens: usize,
}

/// Shared slave state; clone freely.
#[derive(Clone)]
pub struct MockSerialSlave {
    slave_id: u8,
    state: Arc<Mutex<SlaveState>>,
}

impl MockSerialSlave {
    /// Create a slave answering to `slave_id`.
    pub fn new(slave_id: u8) -> Self {
        Self {
            slave_id,
            state: Arc::new(Mutex::new(SlaveState {
                behavior: SlaveBehavior::Normal,
                registers: BTreeMap::new(),
                requests: Vec::new(),
                hook: None,
                opens: 0,
            })),
        }
    }

    /// Open a new port on the line.
    pub fn open(&self) -> MockPort {
        self.state.lock().unwrap().opens += 1;
        MockPort {
            slave: self.clone(),
            pending: Vec::new(),
            rx: VecDeque::new(),
        }
    }

    /// Opener closure for `ModbusRtuTransport::new`.
    pub fn opener(&self) -> impl FnMut() -> io::Result<MockPort> + Send + 'static {
        let slave = self.clone();
        move || Ok(slave.open())
    }

    /// Number of times a port was opened.
    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    /// Change behavior.
    pub fn set_behavior(&self, behavior: SlaveBehavior) {
        self.state.lock().unwrap().behavior = behavior;
    }

    /// Set a holding register.
    pub fn set_register(&self, address: u16, value: u16) {
        self.state.lock().unwrap().registers.insert(address, value);
    }

    /// Get a holding register (unset registers read as 0).
    pub fn register(&self, address: u16) -> u16 {
        self.state
            .lock()
            .unwrap()
            .registers
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// Install a hook run after every write.
    pub fn on_write<F>(&self, hook: F)
    where
        F: Fn(&mut BTreeMap<u16, u16>, u16, u16) + Send + 'static,
    {
        self.state.lock().unwrap().hook = Some(Box::new(hook));
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RtuRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    fn respond(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        let request = RtuRequest::decode(frame).ok()?;
        if request.slave() != self.slave_id {
            return None;
        }
        state.requests.push(request.clone());

        let response = match state.behavior {
            SlaveBehavior::Silent => return None,
            SlaveBehavior::Exception(code) => RtuResponse::Exception {
                slave: self.slave_id,
                function: request.function() as u8,
                code,
            },
            _ => Self::process(&mut state, &request, self.slave_id),
        };

        let mut bytes = response.encode();
        match state.behavior {
            SlaveBehavior::CorruptCrc => {
                let last = bytes.len() - 1;
                bytes[last] ^= 0xFF;
            }
            SlaveBehavior::WrongSlave => {
                bytes[0] = self.slave_id.wrapping_add(1);
                let len = bytes.len();
                let crc = crc16(&bytes[..len - 2]);
                bytes[len - 2..].copy_from_slice(&crc.to_le_bytes());
            }
            _ => {}
        }
        Some(bytes)
    }

    fn process(state: &mut SlaveState, request: &RtuRequest, slave: u8) -> RtuResponse {
        match request {
            RtuRequest::ReadHoldingRegisters { address, count, .. } => RtuResponse::Registers {
                slave,
                values: (0..*count)
                    .map(|i| {
                        state
                            .registers
                            .get(&address.wrapping_add(i))
                            .copied()
                            .unwrap_or(0)
                    })
                    .collect(),
            },
            RtuRequest::WriteMultipleRegisters {
                address, values, ..
            } => {
                for (i, value) in values.iter().enumerate() {
                    let register = address.wrapping_add(u16::try_from(i).unwrap());
                    state.registers.insert(register, *value);
                    if let Some(hook) = &state.hook {
                        hook(&mut state.registers, register, *value);
                    }
                }
                RtuResponse::WriteAck {
                    slave,
                    address: *address,
                    count: u16::try_from(values.len()).unwrap(),
                }
            }
        }
    }
}

/// One end of the in-memory serial line.
pub struct MockPort {
    slave: MockSerialSlave,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let frame = std::mem::take(&mut self.pending);
        if let Some(response) = self.slave.respond(&frame) {
            self.rx.extend(response);
        }
        Ok(())
    }
}

/// Reads behave like a serial port opened with [`LINE_TIMEOUT`].
impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() {
            thread::sleep(LINE_TIMEOUT);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no response"));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
