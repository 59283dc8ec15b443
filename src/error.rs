//! Error types for the SNMP transport and configuration layers.
//!
//! Rate computation itself has no error type: bootstrap, too-soon and
//! counter-reset situations are ordinary [`crate::rate::RateOutcome`] values.

use thiserror::Error;

use crate::snmp::{InvalidOid, Oid};

/// Remote sampling failed. Surfaced to the caller as-is; nothing in the
/// rate core retries.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no response from {agent} after {attempts} attempt(s)")]
    Timeout { agent: String, attempts: u32 },

    #[error(transparent)]
    InvalidOid(#[from] InvalidOid),

    #[error("malformed SNMP message: {0}")]
    Decode(String),

    /// Non-zero error-status in the response PDU.
    #[error("agent returned error-status {status} at index {index}")]
    ErrorStatus { status: i64, index: i64 },

    #[error("noSuchObject: {0}")]
    NoSuchObject(Oid),

    #[error("noSuchInstance: {0}")]
    NoSuchInstance(Oid),

    #[error("endOfMibView: {0}")]
    EndOfMibView(Oid),

    #[error("unexpected value for {oid}: expected {expected}")]
    UnexpectedType { oid: Oid, expected: &'static str },

    #[error("counter value has {0} significant bytes, more than 64 bits")]
    CounterOverflow(usize),

    #[error("response carried {got} varbinds, expected {expected}")]
    VarBindCount { expected: usize, got: usize },
}

impl TransportError {
    /// OID the failure refers to, when there is one.
    pub fn oid(&self) -> Option<&Oid> {
        match self {
            TransportError::NoSuchObject(oid)
            | TransportError::NoSuchInstance(oid)
            | TransportError::EndOfMibView(oid)
            | TransportError::UnexpectedType { oid, .. } => Some(oid),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("polling interval must be greater than zero")]
    ZeroInterval,

    #[error("unknown unit '{0}', expected 'mbps' or 'kbps'")]
    UnknownUnit(String),

    #[error("unknown counter reset policy '{0}', expected 'pass-through', 'discard' or 'unwrap'")]
    UnknownResetPolicy(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
