use std::{fs::OpenOptions, path::Path, sync::Mutex};

use anyhow::{anyhow, Context};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "snmp_rate=info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Headless runs log to stderr so stdout stays pure JSON. The dashboard owns
/// the terminal, so it logs to `log_file` instead.
pub fn init_logger(headless: bool, log_file: &Path) -> anyhow::Result<()> {
    if headless {
        tracing_subscriber::registry()
            .with(filter())
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow!("failed to install logger: {e}"))?;
        return Ok(());
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("opening log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(filter())
        .with(
            fmt::layer()
                .compact()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .try_init()
        .map_err(|e| anyhow!("failed to install logger: {e}"))?;
    Ok(())
}
