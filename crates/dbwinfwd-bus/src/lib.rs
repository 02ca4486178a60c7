//! dbwinfwd-bus: the DBWIN debug-message bus.
//!
//! A single 4096-byte shared slot guarded by two named signals:
//! `<NAME>_BUFFER_READY` (slot free, a producer may write) and
//! `<NAME>_DATA_READY` (slot full, the consumer may read). Producers
//! ([`DebugBusWriter`]) wait for the slot, write `[pid][text][NUL]`, and wake
//! the consumer ([`DebugBusReader`]), which copies the message out and
//! re-arms the slot. [`DebugBusProbe`] checks for a consumer without
//! creating anything.
//!
//! On Windows the objects are the native `DBWIN_*` file mapping and events;
//! on Unix the same protocol runs over POSIX shared memory and named
//! semaphores.

pub mod error;
pub mod handle;
pub mod layout;
pub mod name;
pub mod probe;
pub mod reader;
mod sys;
pub mod writer;

pub use error::BusError;
pub use handle::{BusHandle, WaitPolicy};
pub use layout::{BusMessage, MAX_TEXT_LEN, OversizePolicy, SLOT_SIZE};
pub use name::{BusName, DEFAULT_BUS_NAME};
pub use probe::{DebugBusProbe, is_consumer_active};
pub use reader::DebugBusReader;
pub use writer::DebugBusWriter;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::BusName;

    static NEXT: AtomicU32 = AtomicU32::new(0);

    /// A bus name no other test (or test process) uses, short enough for
    /// Darwin's 31-byte object names.
    pub fn unique_bus_name() -> BusName {
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        BusName::new(format!("du{:x}-{n:x}", std::process::id()))
            .expect("generated bus name is valid")
    }
}
