//! Consumer detection.
//!
//! A consumer creates the "buffer ready" signal when it starts. The probe
//! only opens it, never creates it, and closes it right away; no region is
//! mapped. On Windows the signal's existence is the answer. On Unix named
//! objects outlive whoever created them (a forced writer, a killed
//! consumer), so the probe also asks whether a live consumer still holds
//! the bus's consumer lock. The answer can be stale by the time the caller
//! acts.

use std::io;

use crate::name::BusName;
use crate::sys::{self, Signal};

/// True if the bus's "buffer ready" signal exists and a consumer is alive.
pub fn is_consumer_active(name: &BusName) -> bool {
    match consumer_present(name) {
        Ok(active) => active,
        Err(e) => {
            tracing::warn!(bus = %name, "debug bus probe failed: {e}");
            false
        }
    }
}

fn consumer_present(name: &BusName) -> io::Result<bool> {
    if Signal::open_existing(&name.buffer_ready_object())?.is_none() {
        return Ok(false);
    }
    sys::consumer_lock_held(name.base())
}

/// Reusable probe bound to one bus name.
#[derive(Debug, Clone, Default)]
pub struct DebugBusProbe {
    name: BusName,
}

impl DebugBusProbe {
    pub fn new(name: BusName) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &BusName {
        &self.name
    }

    pub fn is_consumer_active(&self) -> bool {
        is_consumer_active(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::DebugBusReader;
    use crate::test_support::unique_bus_name;
    use crate::writer::DebugBusWriter;

    /// Whether the shared slot object exists, checked without creating it.
    #[cfg(unix)]
    fn slot_exists(name: &BusName) -> bool {
        let c_name = std::ffi::CString::new(name.buffer_object()).unwrap();
        // SAFETY: valid C string; without O_CREAT the mode is ignored.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            assert_eq!(err.raw_os_error(), Some(libc::ENOENT), "shm_open failed: {err}");
            return false;
        }
        // SAFETY: `fd` was just returned by shm_open.
        unsafe { libc::close(fd) };
        true
    }

    #[test]
    fn inactive_when_nothing_exists() {
        let name = unique_bus_name();
        assert!(!is_consumer_active(&name));
    }

    #[test]
    fn probe_creates_nothing() {
        let name = unique_bus_name();
        let probe = DebugBusProbe::new(name.clone());
        assert!(!probe.is_consumer_active());
        assert!(!probe.is_consumer_active());
        assert!(Signal::open_existing(&name.buffer_ready_object()).unwrap().is_none());
        assert!(Signal::open_existing(&name.data_ready_object()).unwrap().is_none());
        #[cfg(unix)]
        assert!(!slot_exists(&name));
    }

    #[test]
    fn active_while_consumer_runs() {
        let name = unique_bus_name();
        let reader = DebugBusReader::open(&name).unwrap();
        assert!(is_consumer_active(&name));
        drop(reader);
        assert!(!is_consumer_active(&name));
    }

    #[test]
    fn writer_only_session_is_not_a_consumer() {
        let name = unique_bus_name();
        let writer = DebugBusWriter::open(&name).unwrap();
        writer.publish(1, b"forced\n").unwrap();
        // Windows objects live while the writer holds them.
        #[cfg(unix)]
        assert!(!is_consumer_active(&name));
        drop(writer);
        assert!(!is_consumer_active(&name));
        name.remove().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn slot_appears_only_when_a_participant_opens_the_bus() {
        let name = unique_bus_name();
        assert!(!slot_exists(&name));
        let reader = DebugBusReader::open(&name).unwrap();
        assert!(slot_exists(&name));
        drop(reader);
        assert!(!slot_exists(&name));
    }
}
