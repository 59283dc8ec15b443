use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::constants::{
    DEFAULT_AGENT, DEFAULT_COMMUNITY, DEFAULT_INTERVAL_MS, DEFAULT_LOG_FILE, DEFAULT_PORT,
    DEFAULT_RETRIES, DEFAULT_TIMEOUT_MS,
};
use crate::error::ConfigError;
use crate::rate::{IntervalHint, RateUnit, ResetPolicy};

/// Live receive/transmit rates of one interface, polled over SNMPv2c.
#[derive(Debug, Clone, Parser)]
#[command(name = "snmp_rate", version)]
pub struct Args {
    /// SNMP agent host name or address
    #[arg(long, env = "SNMP_RATE_AGENT", default_value = DEFAULT_AGENT)]
    pub agent: String,

    /// SNMP agent UDP port
    #[arg(long, env = "SNMP_RATE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// SNMPv2c community
    #[arg(long, env = "SNMP_RATE_COMMUNITY", default_value = DEFAULT_COMMUNITY)]
    pub community: String,

    /// ifIndex to monitor (defaults to the first interface the agent lists)
    #[arg(short, long, env = "SNMP_RATE_INTERFACE")]
    pub interface: Option<u32>,

    /// Polling interval in milliseconds, also used as the rate interval hint
    #[arg(long, env = "SNMP_RATE_INTERVAL_MS", default_value_t = DEFAULT_INTERVAL_MS)]
    pub interval_ms: u64,

    /// Rate unit: mbps or kbps
    #[arg(short, long, env = "SNMP_RATE_UNIT", default_value = "mbps")]
    pub unit: String,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "SNMP_RATE_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Resends after a timeout
    #[arg(long, env = "SNMP_RATE_RETRIES", default_value_t = DEFAULT_RETRIES)]
    pub retries: u32,

    /// Handling of counters that decrease: pass-through, discard or unwrap
    #[arg(long, env = "SNMP_RATE_ON_COUNTER_RESET", default_value = "pass-through")]
    pub on_counter_reset: String,

    /// Print one JSON object per poll instead of drawing the dashboard
    #[arg(long)]
    pub headless: bool,

    /// Stop after this many polls (headless only)
    #[arg(long, requires = "headless")]
    pub count: Option<u64>,

    /// Print the agent's interfaces as JSON and exit
    #[arg(long)]
    pub list_interfaces: bool,

    /// Log file used while the dashboard owns the terminal
    #[arg(long, env = "SNMP_RATE_LOG_FILE", default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub agent: String,
    pub port: u16,
    pub community: String,
    pub interface: Option<u32>,
    pub interval: IntervalHint,
    pub unit: RateUnit,
    pub timeout: Duration,
    pub retries: u32,
    pub reset_policy: ResetPolicy,
    pub headless: bool,
    pub count: Option<u64>,
    pub list_interfaces: bool,
    pub log_file: PathBuf,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        Ok(Self {
            interval: IntervalHint::try_from(args.interval_ms)?,
            unit: args.unit.parse()?,
            reset_policy: args.on_counter_reset.parse()?,
            timeout: Duration::from_millis(args.timeout_ms),
            agent: args.agent,
            port: args.port,
            community: args.community,
            interface: args.interface,
            retries: args.retries,
            headless: args.headless,
            count: args.count,
            list_interfaces: args.list_interfaces,
            log_file: args.log_file,
        })
    }
}
