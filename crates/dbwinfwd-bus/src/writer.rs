//! Producer side of the bus.
//!
//! `publish` runs the three-step DBWIN handshake: wait for "buffer ready",
//! write `[pid][text][NUL]`, set "data ready". The consumer re-arms "buffer
//! ready" after copying the message out, so at most one producer in the
//! whole system owns the slot at any time.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::BusError;
use crate::handle::{BusHandle, WaitPolicy};
use crate::layout::{self, Cut, MAX_TEXT_LEN, OversizePolicy};
use crate::name::BusName;

#[derive(Debug)]
pub struct DebugBusWriter {
    bus: BusHandle,
    oversize: OversizePolicy,
}

impl DebugBusWriter {
    pub fn new(bus: BusHandle) -> Self {
        Self {
            bus,
            oversize: OversizePolicy::default(),
        }
    }

    /// Open (creating if needed) the named bus and wrap it.
    pub fn open(name: &BusName) -> Result<Self, BusError> {
        Ok(Self::new(BusHandle::open_or_create(name)?))
    }

    #[must_use]
    pub fn with_oversize_policy(mut self, policy: OversizePolicy) -> Self {
        self.oversize = policy;
        self
    }

    pub fn oversize_policy(&self) -> OversizePolicy {
        self.oversize
    }

    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    /// Publish one message, blocking until the slot is free.
    ///
    /// With no consumer running this blocks forever once the slot is full.
    pub fn publish(&self, pid: u32, text: &[u8]) -> Result<(), BusError> {
        self.publish_with(pid, text, WaitPolicy::Forever)
    }

    /// Publish, giving up with [`BusError::Timeout`] if the slot stays busy.
    pub fn publish_timeout(&self, pid: u32, text: &[u8], timeout: Duration) -> Result<(), BusError> {
        self.publish_with(pid, text, WaitPolicy::Timeout(timeout))
    }

    /// Publish, giving up with [`BusError::Cancelled`] when `cancel` fires.
    pub fn publish_cancellable(
        &self,
        pid: u32,
        text: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        self.publish_with(pid, text, WaitPolicy::Cancellable(cancel, None))
    }

    /// Publish under an explicit wait policy. The size check happens before
    /// any wait, so a rejected message never touches the slot.
    pub fn publish_with(&self, pid: u32, text: &[u8], wait: WaitPolicy<'_>) -> Result<(), BusError> {
        let fitted = layout::fit_payload(text, self.oversize)?;
        match fitted.cut {
            Some(Cut::Truncated) => tracing::warn!(
                pid,
                len = text.len(),
                kept = MAX_TEXT_LEN,
                "message truncated to slot capacity"
            ),
            Some(Cut::InteriorNul) => tracing::debug!(
                pid,
                kept = fitted.bytes.len(),
                "message cut at embedded NUL"
            ),
            None => {}
        }

        let mut encoded = Vec::with_capacity(fitted.bytes.len() + layout::PID_SIZE + 1);
        layout::encode(pid, fitted.bytes, &mut encoded);

        self.bus.wait_buffer_ready(wait)?;
        self.bus.write_slot(&encoded);
        self.bus.signal_data_ready()?;

        tracing::debug!(pid, len = fitted.bytes.len(), bus = %self.bus.name(), "published");
        Ok(())
    }
}
