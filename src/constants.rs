pub const DEFAULT_AGENT: &str = "192.168.1.2";
pub const DEFAULT_PORT: u16 = 161;
pub const DEFAULT_COMMUNITY: &str = "public";
pub const DEFAULT_INTERFACE: u32 = 1;
pub const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_RETRIES: u32 = 1;
pub const DEFAULT_LOG_FILE: &str = "snmp_rate.log";

// ifHCInOctets / ifHCOutOctets (64-bit counters)
pub const RX_OID_BASE: &str = "1.3.6.1.2.1.31.1.1.1.6";
pub const TX_OID_BASE: &str = "1.3.6.1.2.1.31.1.1.1.10";
// ifDescr
pub const IF_DESCR_OID: &str = "1.3.6.1.2.1.2.2.1.2";

pub const MAX_DATA_POINTS: usize = 30;
pub const REFRESH_CHOICES_MS: [u64; 4] = [1000, 2000, 5000, 10000];

pub const MSG_COLLECTING: &str =
    "Initial data collection done. Rates will be shown on the next update.";
pub const MSG_TOO_SOON: &str = "Time interval too short. Retrying.";
pub const MSG_STALE: &str = "Sample older than the previous reading was discarded.";
pub const MSG_COUNTER_RESET: &str = "Counter decreased since last reading; baseline reset.";
pub const MSG_SNMP_FAILURE: &str = "Failed to query the SNMP device.";
