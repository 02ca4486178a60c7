//! Error types for the debug bus.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("invalid bus name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("debug bus {name} unavailable: {source}")]
    Unavailable {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("message of {len} bytes exceeds slot capacity of {capacity} bytes")]
    MessageTooLong { len: usize, capacity: usize },

    #[error("timed out after {0:?} waiting on the debug bus")]
    Timeout(Duration),

    #[error("wait on the debug bus was cancelled")]
    Cancelled,

    #[error("debug bus signal {name} failed: {source}")]
    Signal {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
