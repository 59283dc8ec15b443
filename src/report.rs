//! JSON shapes handed to dashboard consumers, one per poll.

use serde::{Deserialize, Serialize};

use crate::constants::MSG_SNMP_FAILURE;
use crate::error::TransportError;
use crate::poller::{InterfaceInfo, TrafficReport};
use crate::rate::RateUnit;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrafficResponse {
    Rates {
        unidade: RateUnit,
        #[serde(rename = "rxRate")]
        rx_rate: String,
        #[serde(rename = "txRate")]
        tx_rate: String,
        timestamp: String,
    },
    Message {
        message: String,
    },
    Error {
        error: String,
        details: String,
    },
}

impl From<&TrafficReport> for TrafficResponse {
    fn from(report: &TrafficReport) -> Self {
        match report {
            TrafficReport::Rates {
                unit,
                rx_rate,
                tx_rate,
                timestamp,
            } => TrafficResponse::Rates {
                unidade: *unit,
                rx_rate: format!("{rx_rate:.2}"),
                tx_rate: format!("{tx_rate:.2}"),
                timestamp: timestamp.format("%H:%M:%S").to_string(),
            },
            TrafficReport::Pending(pending) => TrafficResponse::Message {
                message: pending.message().to_string(),
            },
        }
    }
}

impl From<&TransportError> for TrafficResponse {
    fn from(err: &TransportError) -> Self {
        let error = match err.oid() {
            Some(oid) => format!("OID error: {oid}"),
            None => MSG_SNMP_FAILURE.to_string(),
        };
        TrafficResponse::Error {
            error,
            details: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceList {
    pub interfaces: Vec<InterfaceInfo>,
}
