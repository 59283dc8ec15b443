//! Counter-to-rate conversion.
//!
//! Two samples of the same stream are turned into a throughput figure:
//!
//! ```text
//! delta_time = elapsed_ms / hint_ms
//! rate       = delta_bytes * 8 / delta_time / divisor / (hint_ms / 1000)
//! ```
//!
//! When the real polling cadence matches the hint the hint cancels out and
//! the result is plain bits per second scaled by the unit divisor.

use std::{
    fmt,
    num::NonZeroU64,
    str::FromStr,
    sync::{Mutex, PoisonError},
    time::Instant,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::DEFAULT_INTERVAL_MS;
use crate::counter::{CounterSample, CounterStore, StreamKey};
use crate::error::ConfigError;

const COUNTER64_MODULUS: i128 = 1 << 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateUnit {
    #[default]
    Mbps,
    Kbps,
}

impl RateUnit {
    pub fn divisor(self) -> f64 {
        match self {
            RateUnit::Mbps => 1_000_000.0,
            RateUnit::Kbps => 1_000.0,
        }
    }

    /// Lowercase wire name, as used in query strings and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            RateUnit::Mbps => "mbps",
            RateUnit::Kbps => "kbps",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RateUnit::Mbps => "Mbps",
            RateUnit::Kbps => "Kbps",
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            RateUnit::Mbps => RateUnit::Kbps,
            RateUnit::Kbps => RateUnit::Mbps,
        }
    }

    /// Re-express `value`, given in `self`, in `other`.
    pub fn convert(self, value: f64, other: RateUnit) -> f64 {
        value * self.divisor() / other.divisor()
    }
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RateUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mbps" => Ok(RateUnit::Mbps),
            "kbps" => Ok(RateUnit::Kbps),
            _ => Err(ConfigError::UnknownUnit(s.to_string())),
        }
    }
}

/// Expected polling interval in milliseconds. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalHint(NonZeroU64);

impl IntervalHint {
    pub fn from_millis(ms: u64) -> Option<Self> {
        NonZeroU64::new(ms).map(Self)
    }

    pub fn as_millis(self) -> u64 {
        self.0.get()
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0.get() as f64 / 1000.0
    }
}

impl Default for IntervalHint {
    fn default() -> Self {
        Self(NonZeroU64::new(DEFAULT_INTERVAL_MS).unwrap_or(NonZeroU64::MIN))
    }
}

impl TryFrom<u64> for IntervalHint {
    type Error = ConfigError;

    fn try_from(ms: u64) -> Result<Self, Self::Error> {
        Self::from_millis(ms).ok_or(ConfigError::ZeroInterval)
    }
}

/// What to do when a counter is lower than the stored baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetPolicy {
    /// Feed the signed delta into the formula; the rate comes out negative.
    #[default]
    PassThrough,
    /// Report no rate and restart from the new value.
    Discard,
    /// Treat the decrease as a 64-bit wrap.
    Unwrap,
}

impl FromStr for ResetPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pass-through" | "passthrough" => Ok(ResetPolicy::PassThrough),
            "discard" => Ok(ResetPolicy::Discard),
            "unwrap" => Ok(ResetPolicy::Unwrap),
            _ => Err(ConfigError::UnknownResetPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateResult {
    /// Rounded to two decimal places.
    pub rate: f64,
    pub unit: RateUnit,
    pub computed_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateOutcome {
    /// First sample for this stream; it is now the baseline.
    Collecting,
    /// Zero time elapsed since the baseline; retry later.
    TooSoon,
    /// Sample predates the baseline and was dropped.
    Stale,
    /// Counter went backwards and [`ResetPolicy::Discard`] is active.
    CounterReset,
    Rate(RateResult),
}

impl RateOutcome {
    /// Whether the sample that produced this outcome becomes the new
    /// baseline.
    pub fn replaces_baseline(&self) -> bool {
        !matches!(self, RateOutcome::TooSoon | RateOutcome::Stale)
    }

    pub fn rate(&self) -> Option<RateResult> {
        match self {
            RateOutcome::Rate(r) => Some(*r),
            _ => None,
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Compare `current` against `previous` without touching any store.
pub fn evaluate(
    previous: Option<&CounterSample>,
    current: &CounterSample,
    hint: IntervalHint,
    unit: RateUnit,
    policy: ResetPolicy,
) -> RateOutcome {
    let previous = match previous {
        Some(p) if p.key == current.key => p,
        _ => return RateOutcome::Collecting,
    };

    let elapsed = match current.observed_at.checked_duration_since(previous.observed_at) {
        Some(elapsed) => elapsed,
        None => return RateOutcome::Stale,
    };
    let elapsed_ms = elapsed.as_nanos() as f64 / 1_000_000.0;
    let delta_time = elapsed_ms / hint.as_millis() as f64;
    if delta_time == 0.0 {
        return RateOutcome::TooSoon;
    }

    let mut delta = i128::from(current.value) - i128::from(previous.value);
    if delta < 0 {
        warn!(
            stream = %current.key,
            previous = previous.value,
            current = current.value,
            ?policy,
            "counter decreased"
        );
        match policy {
            ResetPolicy::PassThrough => {}
            ResetPolicy::Discard => return RateOutcome::CounterReset,
            ResetPolicy::Unwrap => delta += COUNTER64_MODULUS,
        }
    }

    let bits_per_unit_time = delta as f64 * 8.0 / delta_time;
    let rate = bits_per_unit_time / unit.divisor() / hint.as_secs_f64();

    RateOutcome::Rate(RateResult {
        rate: round2(rate),
        unit,
        computed_at: current.observed_at,
    })
}

/// Serialises read-modify-write of the counter store around [`evaluate`].
pub struct RateCalculator<S> {
    store: Mutex<S>,
    policy: ResetPolicy,
}

impl<S: CounterStore> RateCalculator<S> {
    pub fn new(store: S) -> Self {
        Self::with_policy(store, ResetPolicy::default())
    }

    pub fn with_policy(store: S, policy: ResetPolicy) -> Self {
        Self {
            store: Mutex::new(store),
            policy,
        }
    }

    pub fn compute_rate(
        &self,
        current: CounterSample,
        hint: IntervalHint,
        unit: RateUnit,
    ) -> RateOutcome {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = store.get(&current.key);
        let outcome = evaluate(previous.as_ref(), &current, hint, unit, self.policy);

        match outcome {
            RateOutcome::Collecting => debug!(stream = %current.key, "collecting initial sample"),
            RateOutcome::TooSoon => debug!(stream = %current.key, "sampled too soon"),
            RateOutcome::Stale => debug!(stream = %current.key, "dropping out-of-order sample"),
            _ => {}
        }

        if outcome.replaces_baseline() {
            store.set(current);
        }
        outcome
    }

    /// Baseline currently held for `key`.
    pub fn previous(&self, key: &StreamKey) -> Option<CounterSample> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
    }

    pub fn into_store(self) -> S {
        self.store.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounterStore;
    use std::time::Duration;

    fn hint(ms: u64) -> IntervalHint {
        IntervalHint::from_millis(ms).unwrap()
    }

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn test_bootstrap_without_previous() {
        let t0 = Instant::now();
        let current = CounterSample::new(StreamKey::rx(1), 100, t0);
        let outcome = evaluate(None, &current, hint(1000), RateUnit::Mbps, ResetPolicy::PassThrough);
        assert_eq!(outcome, RateOutcome::Collecting);
        assert!(outcome.replaces_baseline());
    }

    #[test]
    fn test_mismatched_key_is_bootstrap() {
        let t0 = Instant::now();
        let prev = CounterSample::new(StreamKey::rx(1), 100, t0);
        let current = CounterSample::new(StreamKey::rx(2), 500, at(t0, 1000));
        let outcome = evaluate(Some(&prev), &current, hint(1000), RateUnit::Mbps, ResetPolicy::PassThrough);
        assert_eq!(outcome, RateOutcome::Collecting);
    }

    #[test]
    fn test_eight_mbps() {
        let t0 = Instant::now();
        let prev = CounterSample::new(StreamKey::rx(1), 1_000_000, t0);
        let current = CounterSample::new(StreamKey::rx(1), 2_000_000, at(t0, 1000));
        let rate = evaluate(Some(&prev), &current, hint(1000), RateUnit::Mbps, ResetPolicy::PassThrough)
            .rate()
            .unwrap();
        assert_eq!(rate.rate, 8.0);
        assert_eq!(rate.unit, RateUnit::Mbps);
        assert_eq!(rate.computed_at, current.observed_at);
    }

    #[test]
    fn test_hint_cancels_when_cadence_matches() {
        let t0 = Instant::now();
        let prev = CounterSample::new(StreamKey::tx(1), 1_000_000, t0);
        let current = CounterSample::new(StreamKey::tx(1), 2_000_000, at(t0, 1000));
        let rate = evaluate(Some(&prev), &current, hint(2000), RateUnit::Mbps, ResetPolicy::PassThrough)
            .rate()
            .unwrap();
        assert_eq!(rate.rate, 8.0);
    }

    #[test]
    fn test_zero_interval_is_too_soon() {
        let t0 = Instant::now();
        let prev = CounterSample::new(StreamKey::rx(1), 1, t0);
        let current = CounterSample::new(StreamKey::rx(1), 2, t0);
        let outcome = evaluate(Some(&prev), &current, hint(1000), RateUnit::Mbps, ResetPolicy::PassThrough);
        assert_eq!(outcome, RateOutcome::TooSoon);
        assert!(!outcome.replaces_baseline());
    }

    #[test]
    fn test_older_sample_is_stale() {
        let t0 = Instant::now();
        let prev = CounterSample::new(StreamKey::rx(1), 10, at(t0, 500));
        let current = CounterSample::new(StreamKey::rx(1), 20, t0);
        let outcome = evaluate(Some(&prev), &current, hint(1000), RateUnit::Mbps, ResetPolicy::PassThrough);
        assert_eq!(outcome, RateOutcome::Stale);
    }

    #[test]
    fn test_negative_delta_passes_through() {
        let t0 = Instant::now();
        let prev = CounterSample::new(StreamKey::rx(1), 2_000_000, t0);
        let current = CounterSample::new(StreamKey::rx(1), 1_000_000, at(t0, 1000));
        let rate = evaluate(Some(&prev), &current, hint(1000), RateUnit::Mbps, ResetPolicy::PassThrough)
            .rate()
            .unwrap();
        assert_eq!(rate.rate, -8.0);
    }

    #[test]
    fn test_negative_delta_discard() {
        let t0 = Instant::now();
        let prev = CounterSample::new(StreamKey::rx(1), 2_000_000, t0);
        let current = CounterSample::new(StreamKey::rx(1), 1_000_000, at(t0, 1000));
        let outcome = evaluate(Some(&prev), &current, hint(1000), RateUnit::Mbps, ResetPolicy::Discard);
        assert_eq!(outcome, RateOutcome::CounterReset);
        assert!(outcome.replaces_baseline());
    }

    #[test]
    fn test_negative_delta_unwrap() {
        let t0 = Instant::now();
        let prev = CounterSample::new(StreamKey::rx(1), u64::MAX - 124_999, t0);
        let current = CounterSample::new(StreamKey::rx(1), 0, at(t0, 1000));
        // 125_000 bytes across the wrap = 1 Mbit
        let rate = evaluate(Some(&prev), &current, hint(1000), RateUnit::Mbps, ResetPolicy::Unwrap)
            .rate()
            .unwrap();
        assert_eq!(rate.rate, 1.0);
    }

    #[test]
    fn test_full_width_counters() {
        let t0 = Instant::now();
        let prev = CounterSample::new(StreamKey::rx(1), u64::MAX - 1_000_000, t0);
        let current = CounterSample::new(StreamKey::rx(1), u64::MAX, at(t0, 1000));
        let rate = evaluate(Some(&prev), &current, hint(1000), RateUnit::Mbps, ResetPolicy::PassThrough)
            .rate()
            .unwrap();
        assert_eq!(rate.rate, 8.0);
    }

    #[test]
    fn test_rounding_to_two_places() {
        let t0 = Instant::now();
        let prev = CounterSample::new(StreamKey::rx(1), 0, t0);
        let current = CounterSample::new(StreamKey::rx(1), 1, at(t0, 3000));
        // 8 bits over 3 s = 2.666.. bps -> 0.002666.. Kbps
        let rate = evaluate(Some(&prev), &current, hint(1000), RateUnit::Kbps, ResetPolicy::PassThrough)
            .rate()
            .unwrap();
        assert_eq!(rate.rate, 0.0);
        assert_eq!(round2(2.666_666), 2.67);
    }

    #[test]
    fn test_calculator_state_machine() {
        let calc = RateCalculator::new(MemoryCounterStore::new());
        let t0 = Instant::now();
        let key = StreamKey::rx(1);

        let first = CounterSample::new(key, 1_000_000, t0);
        assert_eq!(calc.compute_rate(first, hint(1000), RateUnit::Mbps), RateOutcome::Collecting);
        assert_eq!(calc.previous(&key), Some(first));

        let same_time = CounterSample::new(key, 1_500_000, t0);
        assert_eq!(calc.compute_rate(same_time, hint(1000), RateUnit::Mbps), RateOutcome::TooSoon);
        assert_eq!(calc.previous(&key), Some(first));

        let second = CounterSample::new(key, 2_000_000, at(t0, 1000));
        let outcome = calc.compute_rate(second, hint(1000), RateUnit::Mbps);
        assert_eq!(outcome.rate().map(|r| r.rate), Some(8.0));
        assert_eq!(calc.previous(&key), Some(second));
    }

    #[test]
    fn test_calculator_stale_keeps_baseline() {
        let calc = RateCalculator::new(MemoryCounterStore::new());
        let t0 = Instant::now();
        let key = StreamKey::tx(4);
        let newer = CounterSample::new(key, 50, at(t0, 2000));
        calc.compute_rate(newer, hint(1000), RateUnit::Mbps);

        let older = CounterSample::new(key, 40, at(t0, 1000));
        assert_eq!(calc.compute_rate(older, hint(1000), RateUnit::Mbps), RateOutcome::Stale);
        assert_eq!(calc.previous(&key), Some(newer));
    }

    #[test]
    fn test_unit_parsing() {
        assert_eq!("MBPS".parse::<RateUnit>(), Ok(RateUnit::Mbps));
        assert_eq!("kbps".parse::<RateUnit>(), Ok(RateUnit::Kbps));
        assert_eq!(
            "gbps".parse::<RateUnit>(),
            Err(ConfigError::UnknownUnit("gbps".to_string()))
        );
        assert_eq!(RateUnit::Mbps.convert(8.0, RateUnit::Kbps), 8000.0);
        assert_eq!(RateUnit::Kbps.convert(2500.0, RateUnit::Mbps), 2.5);
    }

    #[test]
    fn test_interval_hint() {
        assert!(IntervalHint::from_millis(0).is_none());
        assert_eq!(IntervalHint::default().as_millis(), 1000);
        assert_eq!(IntervalHint::try_from(0), Err(ConfigError::ZeroInterval));
        assert_eq!(hint(2500).as_secs_f64(), 2.5);
    }

    #[test]
    fn test_reset_policy_parsing() {
        assert_eq!("pass-through".parse::<ResetPolicy>(), Ok(ResetPolicy::PassThrough));
        assert_eq!("Discard".parse::<ResetPolicy>(), Ok(ResetPolicy::Discard));
        assert_eq!("unwrap".parse::<ResetPolicy>(), Ok(ResetPolicy::Unwrap));
        assert!("clamp".parse::<ResetPolicy>().is_err());
    }
}
