//! Polls the agent on its own thread so a slow or silent agent never stalls
//! the dashboard. The UI publishes what it wants polled and collects the
//! finished polls through [`SharedPoll`].

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info};

use crate::counter::CounterStore;
use crate::error::TransportError;
use crate::poller::{CounterSource, TrafficPoller, TrafficReport};
use crate::rate::{IntervalHint, RateUnit};

// How often a waiting poll thread looks at the shared request.
const WAKE_SLICE_MS: u64 = 50;
// Finished polls kept for the UI; older ones are dropped first.
const MAX_BACKLOG: usize = 8;

/// What the dashboard currently wants polled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollRequest {
    pub interface: u32,
    pub unit: RateUnit,
    pub interval: IntervalHint,
}

/// A finished poll and the request it answered.
#[derive(Debug)]
pub struct PollResult {
    pub request: PollRequest,
    pub outcome: Result<TrafficReport, TransportError>,
}

// From poll thread to UI thread and back
#[derive(Debug)]
pub struct SharedPoll {
    pub request: PollRequest,
    pub completed: VecDeque<PollResult>,
    pub stop: bool,
}

impl SharedPoll {
    pub fn new(request: PollRequest) -> Self {
        Self {
            request,
            completed: VecDeque::with_capacity(MAX_BACKLOG),
            stop: false,
        }
    }

    fn push(&mut self, result: PollResult) {
        self.completed.push_back(result);
        while self.completed.len() > MAX_BACKLOG {
            self.completed.pop_front();
        }
    }
}

pub fn lock(shared: &Mutex<SharedPoll>) -> MutexGuard<'_, SharedPoll> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the background poll thread. Dropping it asks the thread to stop.
pub struct PollWorker {
    shared: Arc<Mutex<SharedPoll>>,
}

impl PollWorker {
    pub fn spawn<C, S>(poller: TrafficPoller<C, S>, request: PollRequest) -> io::Result<Self>
    where
        C: CounterSource + Send + 'static,
        S: CounterStore + Send + 'static,
    {
        let shared = Arc::new(Mutex::new(SharedPoll::new(request)));
        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("snmp-poller".into())
            .spawn(move || poll_loop(&poller, &thread_shared))?;
        info!(interface = request.interface, "poll thread started");
        Ok(Self { shared })
    }

    pub fn shared(&self) -> &Mutex<SharedPoll> {
        &self.shared
    }
}

impl Drop for PollWorker {
    // No join: the thread may be blocked in a socket read until its timeout.
    fn drop(&mut self) {
        lock(&self.shared).stop = true;
    }
}

fn poll_loop<C: CounterSource, S: CounterStore>(
    poller: &TrafficPoller<C, S>,
    shared: &Mutex<SharedPoll>,
) {
    loop {
        let request = {
            let guard = lock(shared);
            if guard.stop {
                break;
            }
            guard.request
        };

        let started = Instant::now();
        let outcome = poller.poll(request.interface, request.interval, request.unit);
        debug!(interface = request.interface, ok = outcome.is_ok(), "poll finished");
        lock(shared).push(PollResult { request, outcome });

        if !wait_for_next(shared, request.interface, started) {
            break;
        }
    }
    info!("poll thread stopped");
}

/// Sleeps until the current interval has passed since `started`, or until
/// the dashboard selects another interface. `false` means stop.
fn wait_for_next(shared: &Mutex<SharedPoll>, interface: u32, started: Instant) -> bool {
    loop {
        let (stop, current) = {
            let guard = lock(shared);
            (guard.stop, guard.request)
        };
        if stop {
            return false;
        }
        let interval = Duration::from_millis(current.interval.as_millis());
        let elapsed = started.elapsed();
        if current.interface != interface || elapsed >= interval {
            return true;
        }
        thread::sleep((interval - elapsed).min(Duration::from_millis(WAKE_SLICE_MS)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::encode_unsigned;
    use crate::counter::{MemoryCounterStore, StreamKey};
    use crate::error::Result;
    use crate::poller::{InterfaceInfo, Pending, RawCounter};
    use crate::rate::RateCalculator;
    use chrono::Local;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Counts reads; each read blocks for `delay` first.
    struct SlowSource {
        delay: Duration,
        reads: Arc<AtomicU64>,
    }

    impl CounterSource for SlowSource {
        fn read(&self, keys: &[StreamKey]) -> Result<Vec<RawCounter>> {
            thread::sleep(self.delay);
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(keys
                .iter()
                .map(|_| RawCounter {
                    bytes: encode_unsigned(n * 1000),
                    observed_at: Instant::now(),
                    sampled_at: Local::now(),
                })
                .collect())
        }

        fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
            Ok(Vec::new())
        }
    }

    fn spawn(delay_ms: u64, interval_ms: u64) -> (PollWorker, Arc<AtomicU64>) {
        let reads = Arc::new(AtomicU64::new(0));
        let source = SlowSource {
            delay: Duration::from_millis(delay_ms),
            reads: Arc::clone(&reads),
        };
        let poller = TrafficPoller::new(source, RateCalculator::new(MemoryCounterStore::new()));
        let request = PollRequest {
            interface: 1,
            unit: RateUnit::Mbps,
            interval: IntervalHint::from_millis(interval_ms).unwrap(),
        };
        (PollWorker::spawn(poller, request).unwrap(), reads)
    }

    fn wait_for_result(
        worker: &PollWorker,
        timeout: Duration,
        accept: impl Fn(&PollResult) -> bool,
    ) -> Option<PollResult> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let found = {
                let mut guard = lock(worker.shared());
                let pos = guard.completed.iter().position(|r| accept(r));
                pos.and_then(|p| guard.completed.remove(p))
            };
            if found.is_some() {
                return found;
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }

    #[test]
    fn test_slow_poll_does_not_hold_shared_state() {
        let (worker, _) = spawn(400, 1000);
        thread::sleep(Duration::from_millis(50));

        // The poll is still in flight; the UI side must get the lock at once.
        let started = Instant::now();
        let pending = lock(worker.shared()).completed.len();
        assert_eq!(pending, 0);
        assert!(started.elapsed() < Duration::from_millis(100));

        let first = wait_for_result(&worker, Duration::from_secs(3), |_| true).unwrap();
        assert_eq!(first.request.interface, 1);
        assert!(matches!(first.outcome, Ok(TrafficReport::Pending(Pending::Collecting))));
    }

    #[test]
    fn test_interface_change_polls_without_waiting_interval() {
        let (worker, _) = spawn(0, 10_000);
        wait_for_result(&worker, Duration::from_secs(3), |_| true).unwrap();

        lock(worker.shared()).request.interface = 2;
        let result =
            wait_for_result(&worker, Duration::from_secs(2), |r| r.request.interface == 2);
        assert!(result.is_some());
    }

    #[test]
    fn test_drop_stops_polling() {
        let (worker, reads) = spawn(0, 20);
        wait_for_result(&worker, Duration::from_secs(3), |_| true).unwrap();
        drop(worker);

        thread::sleep(Duration::from_millis(200));
        let settled = reads.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(reads.load(Ordering::SeqCst), settled);
    }

    #[test]
    fn test_backlog_is_bounded() {
        let request = PollRequest {
            interface: 1,
            unit: RateUnit::Kbps,
            interval: IntervalHint::default(),
        };
        let mut shared = SharedPoll::new(request);
        for _ in 0..(MAX_BACKLOG + 3) {
            shared.push(PollResult {
                request,
                outcome: Ok(TrafficReport::Pending(Pending::TooSoon)),
            });
        }
        assert_eq!(shared.completed.len(), MAX_BACKLOG);
    }
}
