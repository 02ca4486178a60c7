//! Consumer side of the bus: the half a debug-output monitor runs.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::BusError;
use crate::handle::{BusHandle, WaitPolicy};
use crate::layout::BusMessage;
use crate::name::BusName;
use crate::sys::ConsumerLock;

/// Reads messages off the bus one at a time.
///
/// On Unix the reader owns the bus lifetime: it holds the consumer lock
/// for as long as it lives, and the last reader to drop removes the named
/// objects. Windows gets the same effect from handle reference counting.
#[derive(Debug)]
pub struct DebugBusReader {
    bus: BusHandle,
    consumer: ConsumerLock,
    remove_on_drop: bool,
}

impl DebugBusReader {
    pub fn open(name: &BusName) -> Result<Self, BusError> {
        let consumer = ConsumerLock::acquire(name.base()).map_err(|source| BusError::Unavailable {
            name: name.to_string(),
            source,
        })?;
        let bus = BusHandle::open_or_create(name)?;
        tracing::info!(bus = %name, "debug bus consumer started");
        Ok(Self {
            bus,
            consumer,
            remove_on_drop: true,
        })
    }

    /// Leave the named objects in place when dropped. Probes stop reporting
    /// the consumer either way.
    #[must_use]
    pub fn keep_on_drop(mut self) -> Self {
        self.remove_on_drop = false;
        self
    }

    pub fn name(&self) -> &BusName {
        self.bus.name()
    }

    /// Block until the next message arrives.
    pub fn read(&self) -> Result<BusMessage, BusError> {
        self.read_with(WaitPolicy::Forever)
    }

    /// Next message, or `None` if none arrives within `timeout`.
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<BusMessage>, BusError> {
        none_on_expiry(self.read_with(WaitPolicy::Timeout(timeout)))
    }

    /// Next message, or `None` once `cancel` fires.
    pub fn read_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<BusMessage>, BusError> {
        none_on_expiry(self.read_with(WaitPolicy::Cancellable(cancel, None)))
    }

    /// Wait for "data ready", copy the slot, re-arm "buffer ready".
    pub fn read_with(&self, wait: WaitPolicy<'_>) -> Result<BusMessage, BusError> {
        self.bus.wait_data_ready(wait)?;
        let message = self.bus.read_slot();
        self.bus.signal_buffer_ready()?;
        Ok(message)
    }
}

impl Drop for DebugBusReader {
    fn drop(&mut self) {
        if !self.remove_on_drop || !self.consumer.is_sole_holder() {
            return;
        }
        if let Err(e) = self.bus.name().remove() {
            tracing::warn!(bus = %self.bus.name(), "failed to remove debug bus objects: {e}");
        }
    }
}

fn none_on_expiry(result: Result<BusMessage, BusError>) -> Result<Option<BusMessage>, BusError> {
    match result {
        Ok(message) => Ok(Some(message)),
        Err(BusError::Timeout(_) | BusError::Cancelled) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::is_consumer_active;
    use crate::test_support::unique_bus_name;

    #[test]
    fn last_reader_removes_the_bus() {
        let name = unique_bus_name();
        let first = DebugBusReader::open(&name).unwrap();
        let second = DebugBusReader::open(&name).unwrap();

        drop(first);
        assert!(is_consumer_active(&name), "second reader still listening");

        drop(second);
        assert!(!is_consumer_active(&name));
        assert!(crate::sys::Signal::open_existing(&name.buffer_ready_object()).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn kept_objects_do_not_look_like_a_consumer() {
        let name = unique_bus_name();
        drop(DebugBusReader::open(&name).unwrap().keep_on_drop());
        assert!(crate::sys::Signal::open_existing(&name.buffer_ready_object()).unwrap().is_some());
        assert!(!is_consumer_active(&name));
        name.remove().unwrap();
    }
}
