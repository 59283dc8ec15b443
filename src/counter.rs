use std::{
    collections::HashMap,
    fmt,
    time::Instant,
};

use tracing::debug;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Receive,
    Transmit,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Receive => write!(f, "rx"),
            Direction::Transmit => write!(f, "tx"),
        }
    }
}

/// Identifies one counter series. Samples are comparable only when their
/// keys are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub interface: u32,
    pub direction: Direction,
}

impl StreamKey {
    pub fn new(interface: u32, direction: Direction) -> Self {
        Self { interface, direction }
    }

    pub fn rx(interface: u32) -> Self {
        Self::new(interface, Direction::Receive)
    }

    pub fn tx(interface: u32) -> Self {
        Self::new(interface, Direction::Transmit)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}/{}", self.interface, self.direction)
    }
}

/// One octet-counter observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSample {
    pub key: StreamKey,
    pub value: u64,
    pub observed_at: Instant,
}

impl CounterSample {
    pub fn new(key: StreamKey, value: u64, observed_at: Instant) -> Self {
        Self { key, value, observed_at }
    }
}

/// Holds the last known sample per stream.
pub trait CounterStore {
    /// Previously stored sample for `key`, or `None` if the key is not the
    /// one being tracked or nothing was stored yet.
    fn get(&self, key: &StreamKey) -> Option<CounterSample>;

    /// Replace the stored sample unconditionally.
    fn set(&mut self, sample: CounterSample);
}

/// In-memory store tracking a single interface at a time. Storing a sample
/// for a different interface discards everything kept for the old one.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    samples: HashMap<StreamKey, CounterSample>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked_interface(&self) -> Option<u32> {
        self.samples.keys().next().map(|k| k.interface)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl CounterStore for MemoryCounterStore {
    fn get(&self, key: &StreamKey) -> Option<CounterSample> {
        self.samples.get(key).copied()
    }

    fn set(&mut self, sample: CounterSample) {
        let interface = sample.key.interface;
        if let Some(old) = self.tracked_interface().filter(|i| *i != interface) {
            debug!(from = old, to = interface, "switching tracked interface");
            self.samples.retain(|k, _| k.interface == interface);
        }
        self.samples.insert(sample.key, sample);
    }
}

/// Decode an unsigned big-endian counter as carried in Counter32/Counter64
/// contents. BER may prepend a zero byte to keep the value positive.
pub fn counter_from_be_bytes(bytes: &[u8]) -> Result<u64, TransportError> {
    let significant = match bytes.iter().position(|b| *b != 0) {
        Some(first) => &bytes[first..],
        None => return Ok(0),
    };
    if significant.len() > 8 {
        return Err(TransportError::CounterOverflow(significant.len()));
    }
    Ok(significant
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}
