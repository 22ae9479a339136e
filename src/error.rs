//! Error types for nvreport

use crate::telemetry::Operation;
use std::io;
use thiserror::Error;

/// Result type alias for nvreport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
///
/// None of these are recovered from: the reporter prints the first one it
/// sees and stops.
#[derive(Error, Debug)]
pub enum Error {
    /// The telemetry subsystem could not be initialized (driver missing,
    /// permissions, no supported hardware)
    #[error("Initialization error: {0}")]
    Init(String),

    /// A query against the session or a device failed
    #[error("{op}() failed{}: {reason}", on_device(.device))]
    Query {
        op: Operation,
        device: Option<u32>,
        reason: String,
    },

    /// Device index outside `0..count`
    #[error("Invalid device index {index}: {count} device(s) present")]
    InvalidIndex { index: i64, count: u32 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn on_device(device: &Option<u32>) -> String {
    device.map(|d| format!(" on device {}", d)).unwrap_or_default()
}

impl Error {
    /// Build a query error for a session-level call
    pub fn session_query(op: Operation, reason: impl ToString) -> Self {
        Error::Query {
            op,
            device: None,
            reason: reason.to_string(),
        }
    }

    /// Build a query error for a per-device metric
    pub fn device_query(op: Operation, device: u32, reason: impl ToString) -> Self {
        Error::Query {
            op,
            device: Some(device),
            reason: reason.to_string(),
        }
    }

    /// The operation that failed, if this error came from a query
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Error::Query { op, .. } => Some(*op),
            Error::InvalidIndex { .. } => Some(Operation::DeviceHandleByIndex),
            _ => None,
        }
    }
}
