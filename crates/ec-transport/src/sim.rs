//! In-memory simulated controller.
//!
//! Stores values per address, replays scripted read sequences, applies
//! write-triggered reactions and records every transport event so tests can
//! assert on exact read/write ordering. A [`SimHandle`] stays usable after
//! the transport itself has been moved into a controller.

use crate::{Address, TagValue, Transport};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One observed transport operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A read and the value it returned.
    Read {
        /// Address read.
        address: Address,
        /// Returned value (`None` = failed read).
        value: Option<TagValue>,
    },
    /// A write and whether it was accepted.
    Write {
        /// Address written.
        address: Address,
        /// Value written.
        value: TagValue,
        /// Whether the write succeeded.
        accepted: bool,
    },
}

/// Side effect applied when a reaction fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Store a fixed value.
    Set(Address, TagValue),
    /// Copy the current value of one address to another.
    Copy {
        /// Source address.
        from: Address,
        /// Destination address.
        to: Address,
    },
}

#[derive(Debug, Clone)]
struct Reaction {
    trigger: Address,
    when: TagValue,
    effects: Vec<Effect>,
}

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    refuse_connect: bool,
    values: HashMap<Address, TagValue>,
    scripted: HashMap<Address, VecDeque<Option<TagValue>>>,
    reactions: Vec<Reaction>,
    failing_reads: HashSet<Address>,
    failing_writes: HashSet<Address>,
    events: Vec<TransportEvent>,
}

/// Simulated transport backed by shared in-memory state.
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
}

/// Inspection and fault-injection handle for a [`SimulatedTransport`].
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedTransport {
    /// Create a new, disconnected simulated transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a handle to the shared state.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Transport for SimulatedTransport {
    fn connect(&mut self) -> bool {
        let mut state = lock(&self.state);
        if state.refuse_connect {
            debug!("Simulated connect refused");
            return false;
        }
        state.connected = true;
        true
    }

    fn disconnect(&mut self) {
        lock(&self.state).connected = false;
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn read(&mut self, address: &Address) -> Option<TagValue> {
        let mut state = lock(&self.state);
        let value = if !state.connected || state.failing_reads.contains(address) {
            None
        } else if let Some(next) = state.scripted.get_mut(address).and_then(VecDeque::pop_front) {
            next
        } else {
            state.values.get(address).copied()
        };
        state.events.push(TransportEvent::Read {
            address: address.clone(),
            value,
        });
        value
    }

    fn write(&mut self, address: &Address, value: TagValue) -> bool {
        let mut state = lock(&self.state);
        let accepted = state.connected && !state.failing_writes.contains(address);
        state.events.push(TransportEvent::Write {
            address: address.clone(),
            value,
            accepted,
        });
        if !accepted {
            return false;
        }

        state.values.insert(address.clone(), value);

        let effects: Vec<Effect> = state
            .reactions
            .iter()
            .filter(|r| &r.trigger == address && r.when == value)
            .flat_map(|r| r.effects.iter().cloned())
            .collect();
        for effect in effects {
            match effect {
                Effect::Set(target, v) => {
                    state.values.insert(target, v);
                }
                Effect::Copy { from, to } => {
                    if let Some(v) = state.values.get(&from).copied() {
                        state.values.insert(to, v);
                    }
                }
            }
        }
        true
    }

    fn peer(&self) -> String {
        String::from("simulated")
    }
}

impl SimHandle {
    /// Store a value.
    pub fn set(&self, address: Address, value: impl Into<TagValue>) {
        lock(&self.state).values.insert(address, value.into());
    }

    /// Current stored value (ignores scripts).
    pub fn get(&self, address: &Address) -> Option<TagValue> {
        lock(&self.state).values.get(address).copied()
    }

    /// Queue values returned by the next reads of `address`, ahead of the
    /// stored value. `None` entries simulate failed reads.
    pub fn script_reads<I>(&self, address: Address, values: I)
    where
        I: IntoIterator<Item = Option<TagValue>>,
    {
        lock(&self.state)
            .scripted
            .entry(address)
            .or_default()
            .extend(values);
    }

    /// Apply `effects` whenever `trigger` is written with `when`.
    pub fn on_write(&self, trigger: Address, when: impl Into<TagValue>, effects: Vec<Effect>) {
        lock(&self.state).reactions.push(Reaction {
            trigger,
            when: when.into(),
            effects,
        });
    }

    /// Make reads of `address` fail (or succeed again).
    pub fn fail_reads(&self, address: &Address, fail: bool) {
        let mut state = lock(&self.state);
        if fail {
            state.failing_reads.insert(address.clone());
        } else {
            state.failing_reads.remove(address);
        }
    }

    /// Make writes to `address` fail (or succeed again).
    pub fn fail_writes(&self, address: &Address, fail: bool) {
        let mut state = lock(&self.state);
        if fail {
            state.failing_writes.insert(address.clone());
        } else {
            state.failing_writes.remove(address);
        }
    }

    /// Refuse subsequent connection attempts.
    pub fn refuse_connect(&self, refuse: bool) {
        lock(&self.state).refuse_connect = refuse;
    }

    /// Simulate the peer dropping the connection.
    pub fn drop_connection(&self) {
        lock(&self.state).connected = false;
    }

    /// All recorded events in order.
    pub fn events(&self) -> Vec<TransportEvent> {
        lock(&self.state).events.clone()
    }

    /// Accepted writes in order.
    pub fn writes(&self) -> Vec<(Address, TagValue)> {
        lock(&self.state)
            .events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Write {
                    address,
                    value,
                    accepted: true,
                } => Some((address.clone(), *value)),
                _ => None,
            })
            .collect()
    }

    /// Accepted writes to one address, in order.
    pub fn writes_to(&self, address: &Address) -> Vec<TagValue> {
        self.writes()
            .into_iter()
            .filter(|(a, _)| a == address)
            .map(|(_, v)| v)
            .collect()
    }

    /// Values returned by reads of one address, in order.
    pub fn reads_of(&self, address: &Address) -> Vec<Option<TagValue>> {
        lock(&self.state)
            .events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Read { address: a, value } if a == address => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded events.
    pub fn clear_events(&self) {
        lock(&self.state).events.clear();
    }
}
