//! Error types for forwarding sessions.

use std::path::PathBuf;

use dbwinfwd_bus::BusError;
use dbwinfwd_process::ProcessError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to read from line source: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to publish line: {0}")]
    Publish(#[from] BusError),

    #[error("failed to write forwarded line: {0}")]
    Write(#[source] std::io::Error),

    #[error("forwarding cancelled after {published} lines")]
    Cancelled { published: u64 },

    #[error("line source unavailable: {0}")]
    Source(String),

    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),
}
