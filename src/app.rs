use std::{collections::VecDeque, sync::Mutex};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::constants::{MAX_DATA_POINTS, REFRESH_CHOICES_MS};
use crate::error::TransportError;
use crate::poller::{InterfaceInfo, TrafficReport};
use crate::rate::{IntervalHint, RateUnit};
use crate::worker::{lock, PollRequest, PollResult, SharedPoll};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Info(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LastRates {
    pub rx: f64,
    pub tx: f64,
    pub at: DateTime<Local>,
}

// Main application state
pub struct App {
    pub rx_history: VecDeque<f64>,
    pub tx_history: VecDeque<f64>,
    pub labels: VecDeque<DateTime<Local>>,
    pub peak_rx_record: Option<(f64, DateTime<Local>)>,
    pub peak_tx_record: Option<(f64, DateTime<Local>)>,
    pub last_rates: Option<LastRates>,

    pub interfaces: Vec<InterfaceInfo>,
    pub interface: u32,
    pub unit: RateUnit,
    pub interval: IntervalHint,
    pub status: Status,
}

impl App {
    pub fn new(
        interfaces: Vec<InterfaceInfo>,
        interface: u32,
        unit: RateUnit,
        interval: IntervalHint,
    ) -> App {
        App {
            rx_history: VecDeque::with_capacity(MAX_DATA_POINTS),
            tx_history: VecDeque::with_capacity(MAX_DATA_POINTS),
            labels: VecDeque::with_capacity(MAX_DATA_POINTS),
            peak_rx_record: None,
            peak_tx_record: None,
            last_rates: None,
            interfaces,
            interface,
            unit,
            interval,
            status: Status::Info("Waiting for first poll...".to_string()),
        }
    }

    pub fn interface_name(&self) -> String {
        self.interfaces
            .iter()
            .find(|i| i.index == self.interface)
            .map(|i| i.name.clone())
            .unwrap_or_else(|| format!("if{}", self.interface))
    }

    pub fn request(&self) -> PollRequest {
        PollRequest {
            interface: self.interface,
            unit: self.unit,
            interval: self.interval,
        }
    }

    /// Publish the current selection to the poll thread and take in
    /// whatever it finished since the last tick.
    pub fn on_tick(&mut self, shared: &Mutex<SharedPoll>) {
        let completed = {
            let mut shared = lock(shared);
            shared.request = self.request();
            std::mem::take(&mut shared.completed)
        };
        for result in completed {
            self.apply_result(result);
        }
    }

    pub fn apply_result(&mut self, result: PollResult) {
        if result.request.interface != self.interface {
            debug!(interface = result.request.interface, "dropping poll for deselected interface");
            return;
        }
        match result.outcome {
            Ok(report) => self.apply_report(report),
            Err(e) => self.apply_error(&e),
        }
    }

    pub fn apply_report(&mut self, report: TrafficReport) {
        match report {
            TrafficReport::Rates {
                unit,
                rx_rate,
                tx_rate,
                timestamp,
            } => {
                // A unit switch between request and answer: bring the
                // figures into the unit currently displayed.
                let rx = unit.convert(rx_rate, self.unit);
                let tx = unit.convert(tx_rate, self.unit);

                push_bounded(&mut self.rx_history, rx);
                push_bounded(&mut self.tx_history, tx);
                push_bounded(&mut self.labels, timestamp);

                if self.peak_rx_record.map_or(true, |(peak, _)| rx > peak) {
                    self.peak_rx_record = Some((rx, timestamp));
                }
                if self.peak_tx_record.map_or(true, |(peak, _)| tx > peak) {
                    self.peak_tx_record = Some((tx, timestamp));
                }

                self.last_rates = Some(LastRates { rx, tx, at: timestamp });
                self.status = Status::Info(format!("Updated at {}", timestamp.format("%H:%M:%S")));
            }
            TrafficReport::Pending(pending) => {
                self.status = Status::Info(pending.message().to_string());
            }
        }
    }

    pub fn apply_error(&mut self, err: &TransportError) {
        warn!(error = %err, "poll failed");
        self.status = Status::Error(format!("Error loading data: {err}"));
    }

    fn clear_chart(&mut self) {
        self.rx_history.clear();
        self.tx_history.clear();
        self.labels.clear();
        self.peak_rx_record = None;
        self.peak_tx_record = None;
        self.last_rates = None;
    }

    pub fn select_interface(&mut self, index: u32) {
        if index == self.interface {
            return;
        }
        info!(from = self.interface, to = index, "interface selected");
        self.interface = index;
        self.clear_chart();
        self.status = Status::Info(format!("Switched to {}", self.interface_name()));
    }

    fn step_interface(&mut self, forward: bool) {
        if self.interfaces.is_empty() {
            return;
        }
        let len = self.interfaces.len();
        let pos = self.interfaces.iter().position(|i| i.index == self.interface);
        let next = match (pos, forward) {
            (Some(p), true) => (p + 1) % len,
            (Some(p), false) => (p + len - 1) % len,
            (None, _) => 0,
        };
        self.select_interface(self.interfaces[next].index);
    }

    pub fn next_interface(&mut self) {
        self.step_interface(true);
    }

    pub fn previous_interface(&mut self) {
        self.step_interface(false);
    }

    /// Flip Mbps/Kbps and rescale everything already on screen.
    pub fn toggle_unit(&mut self) {
        let old_unit = self.unit;
        let new_unit = old_unit.toggle();
        let convert = |v: &mut f64| *v = old_unit.convert(*v, new_unit);

        self.rx_history.iter_mut().for_each(convert);
        self.tx_history.iter_mut().for_each(convert);
        for (peak, _) in self.peak_rx_record.iter_mut().chain(self.peak_tx_record.iter_mut()) {
            convert(peak);
        }
        if let Some(last) = self.last_rates.as_mut() {
            convert(&mut last.rx);
            convert(&mut last.tx);
        }
        info!(unit = new_unit.as_str(), "unit changed");
        self.unit = new_unit;
    }

    fn step_interval(&mut self, slower: bool) {
        let current = self.interval.as_millis();
        let next = if slower {
            REFRESH_CHOICES_MS.iter().copied().find(|ms| *ms > current)
        } else {
            REFRESH_CHOICES_MS.iter().rev().copied().find(|ms| *ms < current)
        };
        if let Some(interval) = next.and_then(IntervalHint::from_millis) {
            info!(interval_ms = interval.as_millis(), "refresh interval changed");
            self.interval = interval;
        }
    }

    pub fn slower_refresh(&mut self) {
        self.step_interval(true);
    }

    pub fn faster_refresh(&mut self) {
        self.step_interval(false);
    }
}

fn push_bounded<T>(history: &mut VecDeque<T>, value: T) {
    history.push_back(value);
    while history.len() > MAX_DATA_POINTS {
        history.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::Pending;

    fn interfaces() -> Vec<InterfaceInfo> {
        ["ether1", "ether2", "wlan1"]
            .iter()
            .enumerate()
            .map(|(i, name)| InterfaceInfo {
                index: i as u32 + 1,
                name: name.to_string(),
            })
            .collect()
    }

    fn app() -> App {
        App::new(interfaces(), 1, RateUnit::Mbps, IntervalHint::default())
    }

    fn rates(rx: f64, tx: f64) -> TrafficReport {
        TrafficReport::Rates {
            unit: RateUnit::Mbps,
            rx_rate: rx,
            tx_rate: tx,
            timestamp: Local::now(),
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut app = app();
        for i in 0..(MAX_DATA_POINTS + 5) {
            app.apply_report(rates(i as f64, 0.0));
        }
        assert_eq!(app.rx_history.len(), MAX_DATA_POINTS);
        assert_eq!(app.rx_history.front().copied(), Some(5.0));
        assert_eq!(app.labels.len(), MAX_DATA_POINTS);
    }

    #[test]
    fn test_peaks_track_maximum() {
        let mut app = app();
        app.apply_report(rates(3.0, 9.0));
        app.apply_report(rates(7.0, 1.0));
        assert_eq!(app.peak_rx_record.map(|p| p.0), Some(7.0));
        assert_eq!(app.peak_tx_record.map(|p| p.0), Some(9.0));
    }

    #[test]
    fn test_pending_only_updates_status() {
        let mut app = app();
        app.apply_report(TrafficReport::Pending(Pending::Collecting));
        assert!(app.rx_history.is_empty());
        assert_eq!(app.status, Status::Info(Pending::Collecting.message().to_string()));
    }

    #[test]
    fn test_error_sets_status() {
        let mut app = app();
        app.apply_error(&TransportError::Decode("bad".into()));
        assert!(matches!(app.status, Status::Error(_)));
    }

    #[test]
    fn test_interface_cycle_clears_chart() {
        let mut app = app();
        app.apply_report(rates(1.0, 1.0));
        app.next_interface();
        assert_eq!(app.interface, 2);
        assert!(app.rx_history.is_empty());
        assert!(app.peak_rx_record.is_none());

        app.previous_interface();
        app.previous_interface();
        assert_eq!(app.interface, 3);
        assert_eq!(app.interface_name(), "wlan1");
    }

    #[test]
    fn test_unknown_interface_name() {
        let app = App::new(vec![], 9, RateUnit::Mbps, IntervalHint::default());
        assert_eq!(app.interface_name(), "if9");
    }

    #[test]
    fn test_toggle_unit_rescales() {
        let mut app = app();
        app.apply_report(rates(2.5, 0.5));
        app.toggle_unit();
        assert_eq!(app.unit, RateUnit::Kbps);
        assert_eq!(app.rx_history.back().copied(), Some(2500.0));
        assert_eq!(app.peak_tx_record.map(|p| p.0), Some(500.0));
        app.toggle_unit();
        assert_eq!(app.rx_history.back().copied(), Some(2.5));
    }

    #[test]
    fn test_report_in_stale_unit_is_converted() {
        let mut app = App::new(interfaces(), 1, RateUnit::Kbps, IntervalHint::default());
        app.apply_report(rates(1.0, 2.0));
        assert_eq!(app.rx_history.back().copied(), Some(1000.0));
        assert_eq!(app.tx_history.back().copied(), Some(2000.0));
    }

    #[test]
    fn test_refresh_steps() {
        let mut app = app();
        app.faster_refresh();
        assert_eq!(app.interval.as_millis(), 1000);
        app.slower_refresh();
        app.slower_refresh();
        assert_eq!(app.interval.as_millis(), 5000);
        for _ in 0..5 {
            app.slower_refresh();
        }
        assert_eq!(app.interval.as_millis(), 10000);
    }

    #[test]
    fn test_on_tick_publishes_selection_and_drains() {
        let mut app = app();
        let shared = Mutex::new(SharedPoll::new(app.request()));
        let polled_for_1 = app.request();
        lock(&shared).completed.push_back(PollResult {
            request: polled_for_1,
            outcome: Ok(rates(4.0, 2.0)),
        });

        app.next_interface();
        app.toggle_unit();
        app.on_tick(&shared);

        // Result for the interface we just left is discarded.
        assert!(app.rx_history.is_empty());
        let guard = lock(&shared);
        assert!(guard.completed.is_empty());
        assert_eq!(guard.request.interface, 2);
        assert_eq!(guard.request.unit, RateUnit::Kbps);
    }

    #[test]
    fn test_on_tick_applies_current_interface_results() {
        let mut app = app();
        let shared = Mutex::new(SharedPoll::new(app.request()));
        {
            let mut guard = lock(&shared);
            guard.completed.push_back(PollResult {
                request: app.request(),
                outcome: Ok(rates(4.0, 2.0)),
            });
            guard.completed.push_back(PollResult {
                request: app.request(),
                outcome: Err(TransportError::Decode("bad".into())),
            });
        }
        app.on_tick(&shared);
        assert_eq!(app.rx_history.back().copied(), Some(4.0));
        assert!(matches!(app.status, Status::Error(_)));
    }
}
