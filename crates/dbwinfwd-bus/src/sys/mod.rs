//! Platform backends: a named shared region and named auto-reset signals.
//!
//! Both backends expose the same surface:
//! - `Region::open_or_create(name, len)` maps a shared region, creating it
//!   zero-filled if absent;
//! - `Signal::open_or_create(name, initially_set)` opens or creates a
//!   signal, the initial state applying only to the creator;
//! - `Signal::open_existing(name)` opens without creating (`Ok(None)` if absent);
//! - `Signal::wait(timeout)` consumes the signal, `Ok(false)` on timeout;
//! - `Signal::set()` releases one waiter;
//! - `ConsumerLock::acquire(base)` marks a live consumer, and
//!   `consumer_lock_held(base)` asks whether any is still alive.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::{
    ConsumerLock, MAX_OBJECT_NAME_LEN, Region, Signal, consumer_lock_held, object_name,
    remove_consumer_lock, remove_objects,
};

#[cfg(windows)]
mod win32;
#[cfg(windows)]
pub(crate) use win32::{
    ConsumerLock, MAX_OBJECT_NAME_LEN, Region, Signal, consumer_lock_held, object_name,
    remove_consumer_lock, remove_objects,
};
