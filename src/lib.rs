//! Live interface throughput from SNMP octet counters.
//!
//! A poll reads `ifHCInOctets`/`ifHCOutOctets` for one interface, the
//! [`rate::RateCalculator`] turns consecutive readings into rates, and the
//! result feeds either the terminal dashboard or a JSON line.

pub mod app;
pub mod ber;
pub mod config;
pub mod constants;
pub mod counter;
pub mod error;
pub mod logging;
pub mod poller;
pub mod rate;
pub mod report;
pub mod snmp;
pub mod ui;
pub mod util;
pub mod worker;

pub use counter::{CounterSample, CounterStore, Direction, MemoryCounterStore, StreamKey};
pub use error::{ConfigError, TransportError};
pub use poller::{CounterSource, InterfaceInfo, TrafficPoller, TrafficReport};
pub use rate::{IntervalHint, RateCalculator, RateOutcome, RateResult, RateUnit, ResetPolicy};
