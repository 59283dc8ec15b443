use std::{
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use snmp_rate::{
    app::App,
    config::{Args, Config},
    constants::DEFAULT_INTERFACE,
    logging::init_logger,
    report::{InterfaceList, TrafficResponse},
    snmp::SnmpSession,
    ui,
    worker::PollWorker,
    InterfaceInfo, MemoryCounterStore, RateCalculator, TrafficPoller,
};

fn main() -> Result<()> {
    let config = Config::from_args(Args::parse())?;
    init_logger(config.headless || config.list_interfaces, &config.log_file)?;

    let session = SnmpSession::open(
        &config.agent,
        config.port,
        &config.community,
        config.timeout,
        config.retries,
    )
    .with_context(|| format!("opening SNMP session to {}:{}", config.agent, config.port))?;
    let agent = session.agent().to_string();

    let calculator = RateCalculator::with_policy(MemoryCounterStore::new(), config.reset_policy);
    let poller = TrafficPoller::new(session, calculator);

    if config.list_interfaces {
        let interfaces = poller.interfaces().context("listing interfaces")?;
        println!("{}", serde_json::to_string(&InterfaceList { interfaces })?);
        return Ok(());
    }

    let interfaces = poller.interfaces().unwrap_or_else(|e| {
        warn!(error = %e, "interface discovery failed");
        Vec::new()
    });
    let interface = pick_interface(config.interface, &interfaces);
    info!(interface, unit = config.unit.as_str(), interval_ms = config.interval.as_millis(), "starting");

    if config.headless {
        run_headless(&poller, &config, interface)
    } else {
        let app = App::new(interfaces, interface, config.unit, config.interval);
        let worker = PollWorker::spawn(poller, app.request()).context("starting poll thread")?;
        ui::run(&worker, app, &agent)?;
        Ok(())
    }
}

fn pick_interface(requested: Option<u32>, interfaces: &[InterfaceInfo]) -> u32 {
    requested
        .or_else(|| interfaces.first().map(|i| i.index))
        .unwrap_or(DEFAULT_INTERFACE)
}

fn run_headless(
    poller: &TrafficPoller<SnmpSession, MemoryCounterStore>,
    config: &Config,
    interface: u32,
) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))
        .context("installing Ctrl-C handler")?;

    let interval = Duration::from_millis(config.interval.as_millis());
    let mut stdout = io::stdout();
    let mut polls = 0u64;

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        let response = match poller.poll(interface, config.interval, config.unit) {
            Ok(report) => TrafficResponse::from(&report),
            Err(e) => TrafficResponse::from(&e),
        };
        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;

        polls += 1;
        if config.count.is_some_and(|n| polls >= n) {
            break;
        }

        // Sleep in short slices so Ctrl-C is honoured promptly.
        while running.load(Ordering::SeqCst) && started.elapsed() < interval {
            thread::sleep(interval.saturating_sub(started.elapsed()).min(Duration::from_millis(100)));
        }
    }

    info!(polls, "headless run finished");
    Ok(())
}
