use crate::rate::RateUnit;

pub fn format_rate(rate: f64, unit: RateUnit) -> String {
    format!("{:.2} {}", rate, unit.label())
}

pub fn format_interval(ms: u64) -> String {
    if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// Upper bound for a chart axis: at least 1.0 so an idle link still draws.
pub fn axis_max(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(1.0, f64::max)
}

/// Lower bound for a chart axis: 0.0 unless a counter reset pushed a rate
/// negative.
pub fn axis_min(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(0.0, f64::min)
}
