use std::time::Instant;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::constants::{
    IF_DESCR_OID, MSG_COLLECTING, MSG_COUNTER_RESET, MSG_STALE, MSG_TOO_SOON, RX_OID_BASE,
    TX_OID_BASE,
};
use crate::counter::{counter_from_be_bytes, CounterSample, CounterStore, Direction, StreamKey};
use crate::error::{Result, TransportError};
use crate::rate::{IntervalHint, RateCalculator, RateOutcome, RateUnit};
use crate::snmp::{Oid, SnmpSession, SnmpValue, VarBind};

/// Counter contents as delivered by the transport, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCounter {
    pub bytes: Vec<u8>,
    pub observed_at: Instant,
    /// Wall-clock time taken together with `observed_at`.
    pub sampled_at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub index: u32,
    pub name: String,
}

/// Where counter readings come from.
pub trait CounterSource {
    /// Read `keys` in a single round trip; results come back in the same
    /// order.
    fn read(&self, keys: &[StreamKey]) -> Result<Vec<RawCounter>>;

    fn interfaces(&self) -> Result<Vec<InterfaceInfo>>;
}

fn column_oid(direction: Direction) -> Result<Oid> {
    let base = match direction {
        Direction::Receive => RX_OID_BASE,
        Direction::Transmit => TX_OID_BASE,
    };
    Ok(base.parse()?)
}

// The HC columns are Counter64; a 32-bit counter would wrap at a different
// modulus than the one the calculator unwraps with.
fn hc_counter(vb: VarBind, observed_at: Instant, sampled_at: DateTime<Local>) -> Result<RawCounter> {
    match vb.value {
        SnmpValue::Counter64(bytes) => Ok(RawCounter {
            bytes,
            observed_at,
            sampled_at,
        }),
        _ => Err(TransportError::UnexpectedType {
            oid: vb.oid,
            expected: "Counter64",
        }),
    }
}

impl CounterSource for SnmpSession {
    fn read(&self, keys: &[StreamKey]) -> Result<Vec<RawCounter>> {
        let oids = keys
            .iter()
            .map(|k| column_oid(k.direction).map(|base| base.child(k.interface)))
            .collect::<Result<Vec<_>>>()?;
        let varbinds = self.get(&oids)?;
        let observed_at = Instant::now();
        let sampled_at = Local::now();

        varbinds
            .into_iter()
            .map(|vb| hc_counter(vb, observed_at, sampled_at))
            .collect()
    }

    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        let base: Oid = IF_DESCR_OID.parse()?;
        let interfaces = self
            .walk(&base)?
            .into_iter()
            .filter_map(|vb| {
                let index = vb.oid.last_arc()?;
                let name = vb.value.as_text().unwrap_or_else(|| format!("if{index}"));
                Some(InterfaceInfo { index, name })
            })
            .collect::<Vec<_>>();
        info!(count = interfaces.len(), "discovered interfaces");
        Ok(interfaces)
    }
}

/// Why a poll produced no rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    Collecting,
    TooSoon,
    Stale,
    CounterReset,
}

impl Pending {
    pub fn message(self) -> &'static str {
        match self {
            Pending::Collecting => MSG_COLLECTING,
            Pending::TooSoon => MSG_TOO_SOON,
            Pending::Stale => MSG_STALE,
            Pending::CounterReset => MSG_COUNTER_RESET,
        }
    }

    fn from_outcome(outcome: &RateOutcome) -> Option<Self> {
        match outcome {
            RateOutcome::Collecting => Some(Pending::Collecting),
            RateOutcome::TooSoon => Some(Pending::TooSoon),
            RateOutcome::Stale => Some(Pending::Stale),
            RateOutcome::CounterReset => Some(Pending::CounterReset),
            RateOutcome::Rate(_) => None,
        }
    }

    // Bootstrap wins over everything: a fresh baseline explains any other
    // outcome on the sibling stream.
    fn priority(self) -> u8 {
        match self {
            Pending::Collecting => 0,
            Pending::CounterReset => 1,
            Pending::Stale => 2,
            Pending::TooSoon => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrafficReport {
    Rates {
        unit: RateUnit,
        rx_rate: f64,
        tx_rate: f64,
        timestamp: DateTime<Local>,
    },
    Pending(Pending),
}

impl TrafficReport {
    fn combine(rx: RateOutcome, tx: RateOutcome, timestamp: DateTime<Local>) -> Self {
        match (rx, tx) {
            (RateOutcome::Rate(r), RateOutcome::Rate(t)) => TrafficReport::Rates {
                unit: r.unit,
                rx_rate: r.rate,
                tx_rate: t.rate,
                timestamp,
            },
            (rx, tx) => {
                let pending = [Pending::from_outcome(&rx), Pending::from_outcome(&tx)]
                    .into_iter()
                    .flatten()
                    .min_by_key(|p| p.priority())
                    .unwrap_or(Pending::Collecting);
                TrafficReport::Pending(pending)
            }
        }
    }
}

/// One poll cycle: fetch both counters, feed the calculator, fold the two
/// outcomes into a single report.
pub struct TrafficPoller<C, S> {
    source: C,
    calculator: RateCalculator<S>,
}

impl<C: CounterSource, S: CounterStore> TrafficPoller<C, S> {
    pub fn new(source: C, calculator: RateCalculator<S>) -> Self {
        Self { source, calculator }
    }

    pub fn calculator(&self) -> &RateCalculator<S> {
        &self.calculator
    }

    pub fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        self.source.interfaces()
    }

    pub fn poll(&self, interface: u32, hint: IntervalHint, unit: RateUnit) -> Result<TrafficReport> {
        let keys = [StreamKey::rx(interface), StreamKey::tx(interface)];
        let readings = self.source.read(&keys).map_err(|e| {
            error!(interface, error = %e, "SNMP poll failed");
            e
        })?;
        if readings.len() != keys.len() {
            return Err(TransportError::VarBindCount {
                expected: keys.len(),
                got: readings.len(),
            });
        }

        // Decode both before touching the store so a bad reading leaves
        // rx and tx on the same baseline.
        let timestamp = readings[0].sampled_at;
        let samples = keys
            .iter()
            .zip(&readings)
            .map(|(key, raw)| {
                counter_from_be_bytes(&raw.bytes)
                    .map(|value| CounterSample::new(*key, value, raw.observed_at))
            })
            .collect::<Result<Vec<_>>>()?;

        let outcomes = samples
            .into_iter()
            .map(|sample| self.calculator.compute_rate(sample, hint, unit))
            .collect::<Vec<_>>();
        let report = TrafficReport::combine(outcomes[0], outcomes[1], timestamp);
        debug!(interface, ?report, "poll complete");
        Ok(report)
    }
}
