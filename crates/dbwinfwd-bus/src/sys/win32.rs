//! Win32 backend: the native `DBWIN_*` file mapping and auto-reset events.

use std::io;
use std::time::Duration;

use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Memory::{
    CreateFileMappingW, FILE_MAP_ALL_ACCESS, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile,
    PAGE_READWRITE, UnmapViewOfFile,
};
use windows::Win32::System::Threading::{
    CreateEventW, EVENT_MODIFY_STATE, INFINITE, OpenEventW, SYNCHRONIZATION_SYNCHRONIZE, SetEvent,
    WaitForSingleObject,
};
use windows::core::HSTRING;

const GLOBAL_PREFIX: &str = "Global\\";

/// Kernel object names are limited to `MAX_PATH` characters.
pub(crate) const MAX_OBJECT_NAME_LEN: usize = 260;

pub(crate) fn object_name(base: &str, suffix: &str, global: bool) -> String {
    if global {
        format!("{GLOBAL_PREFIX}{base}_{suffix}")
    } else {
        format!("{base}_{suffix}")
    }
}

/// Kernel objects die with their last handle; nothing to remove.
pub(crate) fn remove_objects(_names: &[String]) -> io::Result<()> {
    Ok(())
}

/// Kernel objects already live exactly as long as some participant holds
/// them, so signal existence is the consumer check and no lock is needed.
#[derive(Debug)]
pub(crate) struct ConsumerLock;

impl ConsumerLock {
    pub(crate) fn acquire(_base: &str) -> io::Result<Self> {
        Ok(Self)
    }

    pub(crate) fn is_sole_holder(&self) -> bool {
        true
    }
}

pub(crate) fn consumer_lock_held(_base: &str) -> io::Result<bool> {
    Ok(true)
}

pub(crate) fn remove_consumer_lock(_base: &str) -> io::Result<()> {
    Ok(())
}

/// Owned kernel handle, closed on drop.
#[derive(Debug)]
struct OwnedHandle(HANDLE);

// SAFETY: kernel handles are process-wide and usable from any thread.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: the handle was returned open by a Create*/Open* call.
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

// ---------------------------------------------------------------------------
// Region
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct Region {
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    len: usize,
    _mapping: OwnedHandle,
}

// SAFETY: see the unix backend; access is serialized by the bus events.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    pub(crate) fn open_or_create(name: &str, len: usize) -> io::Result<Self> {
        let wide = HSTRING::from(name);
        // SAFETY: pagefile-backed mapping; `wide` outlives the call.
        let mapping = unsafe {
            CreateFileMappingW(INVALID_HANDLE_VALUE, None, PAGE_READWRITE, 0, len as u32, &wide)
        }
        .map_err(io::Error::from)?;
        let mapping = OwnedHandle(mapping);

        // SAFETY: mapping `len` bytes of a section at least that large.
        let view = unsafe { MapViewOfFile(mapping.0, FILE_MAP_ALL_ACCESS, 0, 0, len) };
        if view.Value.is_null() {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            view,
            len,
            _mapping: mapping,
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.view.Value.cast()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: unmapping the view created in open_or_create.
        unsafe {
            let _ = UnmapViewOfFile(self.view);
        }
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct Signal {
    event: OwnedHandle,
}

impl Signal {
    pub(crate) fn open_or_create(name: &str, initially_set: bool) -> io::Result<Self> {
        let wide = HSTRING::from(name);
        // SAFETY: auto-reset event; `wide` outlives the call.
        let event = unsafe { CreateEventW(None, false, initially_set, &wide) }
            .map_err(io::Error::from)?;
        Ok(Self {
            event: OwnedHandle(event),
        })
    }

    pub(crate) fn open_existing(name: &str) -> io::Result<Option<Self>> {
        let wide = HSTRING::from(name);
        // SAFETY: opening by name only; nothing is created.
        match unsafe {
            OpenEventW(
                SYNCHRONIZATION_SYNCHRONIZE | EVENT_MODIFY_STATE,
                false,
                &wide,
            )
        } {
            Ok(event) => Ok(Some(Self {
                event: OwnedHandle(event),
            })),
            Err(e) => {
                let err = io::Error::from(e);
                if err.kind() == io::ErrorKind::NotFound {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    pub(crate) fn set(&self) -> io::Result<()> {
        // SAFETY: `event` is an open event handle.
        unsafe { SetEvent(self.event.0) }.map_err(io::Error::from)
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let millis = match timeout {
            None => INFINITE,
            // INFINITE is u32::MAX; stay one below it for finite waits.
            Some(t) => t.as_millis().min(u128::from(INFINITE - 1)) as u32,
        };
        // SAFETY: `event` is an open event handle.
        let result = unsafe { WaitForSingleObject(self.event.0, millis) };
        if result == WAIT_OBJECT_0 {
            Ok(true)
        } else if result == WAIT_TIMEOUT {
            Ok(false)
        } else {
            Err(io::Error::last_os_error())
        }
    }
}
