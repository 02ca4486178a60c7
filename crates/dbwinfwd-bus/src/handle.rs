//! Explicit handle to one named bus: the mapped slot and both signals.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::BusError;
use crate::layout::{self, BusMessage, SLOT_SIZE};
use crate::name::BusName;
use crate::sys::{Region, Signal};

/// Slice length for cancellable waits.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a producer or consumer is willing to block on a signal.
#[derive(Debug, Clone, Copy, Default)]
pub enum WaitPolicy<'a> {
    /// Block until signalled.
    #[default]
    Forever,
    /// Fail with [`BusError::Timeout`] after the duration.
    Timeout(Duration),
    /// Fail with [`BusError::Cancelled`] once the token fires, and with
    /// [`BusError::Timeout`] if an optional limit elapses first.
    Cancellable(&'a CancellationToken, Option<Duration>),
}

/// An open bus. Opening maps the slot and opens both signals, creating
/// whatever does not exist yet ("buffer ready" starts set, "data ready"
/// starts clear). Existing state is never reset.
#[derive(Debug)]
pub struct BusHandle {
    name: BusName,
    region: Region,
    buffer_ready: Signal,
    data_ready: Signal,
}

impl BusHandle {
    pub fn open_or_create(name: &BusName) -> Result<Self, BusError> {
        let unavailable = |source| BusError::Unavailable {
            name: name.to_string(),
            source,
        };

        let buffer_ready =
            Signal::open_or_create(&name.buffer_ready_object(), true).map_err(unavailable)?;
        let data_ready =
            Signal::open_or_create(&name.data_ready_object(), false).map_err(unavailable)?;
        let region = Region::open_or_create(&name.buffer_object(), SLOT_SIZE).map_err(unavailable)?;

        tracing::debug!(bus = %name, "debug bus opened");

        Ok(Self {
            name: name.clone(),
            region,
            buffer_ready,
            data_ready,
        })
    }

    pub fn name(&self) -> &BusName {
        &self.name
    }

    pub(crate) fn wait_buffer_ready(&self, policy: WaitPolicy<'_>) -> Result<(), BusError> {
        self.wait_on(&self.buffer_ready, &self.name.buffer_ready_object(), policy)
    }

    pub(crate) fn wait_data_ready(&self, policy: WaitPolicy<'_>) -> Result<(), BusError> {
        self.wait_on(&self.data_ready, &self.name.data_ready_object(), policy)
    }

    pub(crate) fn signal_buffer_ready(&self) -> Result<(), BusError> {
        self.buffer_ready
            .set()
            .map_err(|source| signal_error(self.name.buffer_ready_object(), source))
    }

    pub(crate) fn signal_data_ready(&self) -> Result<(), BusError> {
        self.data_ready
            .set()
            .map_err(|source| signal_error(self.name.data_ready_object(), source))
    }

    /// Copy an encoded message into the slot. Caller holds "buffer ready".
    pub(crate) fn write_slot(&self, encoded: &[u8]) {
        let len = encoded.len().min(self.region.len());
        // SAFETY: `len` is within the mapping, and the source is a distinct
        // local buffer, so the ranges cannot overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(encoded.as_ptr(), self.region.as_ptr(), len);
        }
    }

    /// Copy the slot out and decode it. Caller holds "data ready".
    pub(crate) fn read_slot(&self) -> BusMessage {
        let mut image = vec![0u8; self.region.len()];
        // SAFETY: reading exactly the mapped length into a local buffer.
        unsafe {
            std::ptr::copy_nonoverlapping(self.region.as_ptr(), image.as_mut_ptr(), image.len());
        }
        layout::decode(&image)
    }

    fn wait_on(&self, signal: &Signal, object: &str, policy: WaitPolicy<'_>) -> Result<(), BusError> {
        let signalled = match policy {
            WaitPolicy::Forever => signal.wait(None),
            WaitPolicy::Timeout(limit) => match signal.wait(Some(limit)) {
                Ok(false) => return Err(BusError::Timeout(limit)),
                other => other,
            },
            WaitPolicy::Cancellable(cancel, limit) => {
                let deadline = limit.map(|l| std::time::Instant::now() + l);
                loop {
                    if cancel.is_cancelled() {
                        return Err(BusError::Cancelled);
                    }
                    let slice = match deadline {
                        Some(deadline) => {
                            let left = deadline.saturating_duration_since(std::time::Instant::now());
                            if left.is_zero() {
                                return Err(BusError::Timeout(limit.unwrap_or_default()));
                            }
                            left.min(CANCEL_POLL_INTERVAL)
                        }
                        None => CANCEL_POLL_INTERVAL,
                    };
                    match signal.wait(Some(slice)) {
                        Ok(false) => continue,
                        other => break other,
                    }
                }
            }
        };

        signalled
            .map(|_| ())
            .map_err(|source| signal_error(object.to_string(), source))
    }
}

fn signal_error(name: String, source: std::io::Error) -> BusError {
    BusError::Signal { name, source }
}
