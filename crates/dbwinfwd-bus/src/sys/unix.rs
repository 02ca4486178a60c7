//! POSIX backend: `shm_open` + `mmap` for the slot, named semaphores for
//! the signals. A semaphore that only ever moves between 0 and 1 behaves
//! as an auto-reset event under this protocol.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::time::Duration;

const OBJECT_MODE: libc::c_uint = 0o600;

/// Longest name `shm_open` and `sem_open` accept, leading slash included.
/// Darwin caps both at `PSHMNAMLEN`/`PSEMNAMLEN`; Linux at `NAME_MAX` less
/// the `sem.` prefix glibc adds.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub(crate) const MAX_OBJECT_NAME_LEN: usize = 31;
#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub(crate) const MAX_OBJECT_NAME_LEN: usize = 251;

pub(crate) fn object_name(base: &str, suffix: &str, _global: bool) -> String {
    format!("/{base}_{suffix}")
}

/// Unlink the given shm/semaphore names. Missing objects are not an error.
pub(crate) fn remove_objects(names: &[String]) -> io::Result<()> {
    let (buffer, signals) = names.split_first().ok_or(io::ErrorKind::InvalidInput)?;
    let buffer = c_name(buffer)?;
    // SAFETY: `buffer` is a valid NUL-terminated string.
    if unsafe { libc::shm_unlink(buffer.as_ptr()) } != 0 {
        ignore_missing(io::Error::last_os_error())?;
    }
    for name in signals {
        let name = c_name(name)?;
        // SAFETY: `name` is a valid NUL-terminated string.
        if unsafe { libc::sem_unlink(name.as_ptr()) } != 0 {
            ignore_missing(io::Error::last_os_error())?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Consumer lock
// ---------------------------------------------------------------------------

/// Lock file whose holders are the live consumers of a bus.
///
/// POSIX names outlive every opener, so their existence alone says nothing
/// about whether a consumer is running. Each consumer holds a shared
/// `flock` on this file instead; the kernel drops it when the process dies.
fn consumer_lock_path(base: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{base}_CONSUMER.lock"))
}

#[derive(Debug)]
pub(crate) struct ConsumerLock {
    file: File,
}

impl ConsumerLock {
    /// Take a shared lock, creating the lock file if needed.
    pub(crate) fn acquire(base: &str) -> io::Result<Self> {
        let path = consumer_lock_path(base);
        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            flock(&file, libc::LOCK_SH)?;
            // The last consumer may have unlinked the file while we waited.
            if is_linked_at(&file, &path)? {
                return Ok(Self { file });
            }
        }
    }

    /// True if no other consumer holds the lock. Converts this holder's
    /// lock to exclusive, so call it only when giving the lock up.
    pub(crate) fn is_sole_holder(&self) -> bool {
        try_flock(&self.file, libc::LOCK_EX | libc::LOCK_NB).unwrap_or(false)
    }
}

/// Whether any consumer currently holds the lock for `base`.
pub(crate) fn consumer_lock_held(base: &str) -> io::Result<bool> {
    let file = match File::open(consumer_lock_path(base)) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    // A granted lock is released when `file` closes.
    Ok(!try_flock(&file, libc::LOCK_EX | libc::LOCK_NB)?)
}

pub(crate) fn remove_consumer_lock(base: &str) -> io::Result<()> {
    match fs::remove_file(consumer_lock_path(base)) {
        Err(e) => ignore_missing(e),
        Ok(()) => Ok(()),
    }
}

fn is_linked_at(file: &File, path: &Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    loop {
        // SAFETY: `file` is open for the duration of the call.
        if unsafe { libc::flock(file.as_raw_fd(), operation) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Non-blocking `flock`: `Ok(false)` if another holder conflicts.
fn try_flock(file: &File, operation: libc::c_int) -> io::Result<bool> {
    match flock(file, operation) {
        Ok(()) => Ok(true),
        Err(e) if e.raw_os_error() == Some(libc::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e),
    }
}

fn ignore_missing(err: io::Error) -> io::Result<()> {
    if err.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(err)
    }
}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

// ---------------------------------------------------------------------------
// Region
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct Region {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is process-wide memory; all access goes through raw
// pointer copies serialized by the bus signals.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    pub(crate) fn open_or_create(name: &str, len: usize) -> io::Result<Self> {
        let c_name = c_name(name)?;
        // SAFETY: valid C string; the mode argument matches the variadic ABI.
        let fd = unsafe {
            libc::shm_open(c_name.as_ptr(), libc::O_RDWR | libc::O_CREAT, OBJECT_MODE)
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just returned by shm_open and is owned by nobody else.
        let file = File::from(unsafe { OwnedFd::from_raw_fd(fd) });

        // Whoever sees a short object grows it; ftruncate zero-fills.
        if file.metadata()?.len() < len as u64 {
            file.set_len(len as u64)?;
        }

        // SAFETY: mapping `len` bytes of a shared object at least that large.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(io::Error::last_os_error)?;

        Ok(Self { ptr, len })
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly what open_or_create mapped.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct Signal {
    sem: NonNull<libc::sem_t>,
}

// SAFETY: POSIX semaphores are designed for concurrent use from any thread.
unsafe impl Send for Signal {}
unsafe impl Sync for Signal {}

impl Signal {
    pub(crate) fn open_or_create(name: &str, initially_set: bool) -> io::Result<Self> {
        let c_name = c_name(name)?;
        let initial: libc::c_uint = initially_set.into();
        // SAFETY: valid C string; mode and value match the variadic ABI.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), libc::O_CREAT, OBJECT_MODE, initial) };
        Self::from_raw(sem)
    }

    pub(crate) fn open_existing(name: &str) -> io::Result<Option<Self>> {
        let c_name = c_name(name)?;
        // SAFETY: valid C string; no O_CREAT, so no variadic arguments.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        match Self::from_raw(sem) {
            Ok(signal) => Ok(Some(signal)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn from_raw(sem: *mut libc::sem_t) -> io::Result<Self> {
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(sem)
            .map(|sem| Self { sem })
            .ok_or_else(io::Error::last_os_error)
    }

    pub(crate) fn set(&self) -> io::Result<()> {
        // SAFETY: `sem` is an open semaphore.
        if unsafe { libc::sem_post(self.sem.as_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        match timeout {
            None => loop {
                // SAFETY: `sem` is an open semaphore.
                if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                    return Ok(true);
                }
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            },
            Some(timeout) => self.wait_timeout(timeout),
        }
    }

    #[cfg(target_os = "linux")]
    fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = realtime_deadline(timeout)?;
        loop {
            // SAFETY: `sem` is open and `deadline` is a valid timespec.
            if unsafe { libc::sem_timedwait(self.sem.as_ptr(), &deadline) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// No `sem_timedwait` outside Linux: poll with `sem_trywait`.
    #[cfg(not(target_os = "linux"))]
    fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        const POLL: Duration = Duration::from_millis(2);
        let deadline = std::time::Instant::now() + timeout;
        loop {
            // SAFETY: `sem` is an open semaphore.
            if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                _ => return Err(err),
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep(POLL.min(deadline - now));
        }
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        // SAFETY: closing a semaphore this value opened.
        unsafe {
            libc::sem_close(self.sem.as_ptr());
        }
    }
}

#[cfg(target_os = "linux")]
fn realtime_deadline(timeout: Duration) -> io::Result<libc::timespec> {
    // SAFETY: timespec is plain old data; all-zero is a valid value.
    let mut now: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: `now` is a valid out-pointer.
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let nanos = now.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
    let secs = (now.tv_sec as u64)
        .saturating_add(timeout.as_secs())
        .saturating_add(nanos / 1_000_000_000);
    // SAFETY: as above.
    let mut deadline: libc::timespec = unsafe { std::mem::zeroed() };
    deadline.tv_sec = secs.min(libc::time_t::MAX as u64) as libc::time_t;
    deadline.tv_nsec = (nanos % 1_000_000_000) as _;
    Ok(deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::unique_bus_name;

    #[test]
    fn open_existing_missing_is_none() {
        let name = unique_bus_name();
        assert!(Signal::open_existing(&name.buffer_ready_object()).unwrap().is_none());
    }

    #[test]
    fn created_set_signal_is_consumed_once() {
        let name = unique_bus_name();
        let signal = Signal::open_or_create(&name.buffer_ready_object(), true).unwrap();
        assert!(signal.wait(Some(Duration::from_millis(10))).unwrap());
        assert!(!signal.wait(Some(Duration::from_millis(10))).unwrap());
        signal.set().unwrap();
        assert!(signal.wait(Some(Duration::from_millis(10))).unwrap());
        name.remove().unwrap();
    }

    #[test]
    fn second_opener_shares_state() {
        let name = unique_bus_name();
        let first = Signal::open_or_create(&name.data_ready_object(), false).unwrap();
        let second = Signal::open_or_create(&name.data_ready_object(), true).unwrap();
        // Creator's initial state wins.
        assert!(!second.wait(Some(Duration::from_millis(10))).unwrap());
        first.set().unwrap();
        assert!(second.wait(Some(Duration::from_millis(10))).unwrap());
        name.remove().unwrap();
    }

    #[test]
    fn removed_signal_is_gone() {
        let name = unique_bus_name();
        let _signal = Signal::open_or_create(&name.buffer_ready_object(), true).unwrap();
        name.remove().unwrap();
        assert!(Signal::open_existing(&name.buffer_ready_object()).unwrap().is_none());
    }

    #[test]
    fn remove_missing_objects_is_ok() {
        unique_bus_name().remove().unwrap();
    }

    #[test]
    fn consumer_lock_tracks_holders() {
        let name = unique_bus_name();
        assert!(!consumer_lock_held(name.base()).unwrap());

        let first = ConsumerLock::acquire(name.base()).unwrap();
        let second = ConsumerLock::acquire(name.base()).unwrap();
        assert!(consumer_lock_held(name.base()).unwrap());
        assert!(!first.is_sole_holder());
        drop(first);

        assert!(second.is_sole_holder());
        drop(second);
        assert!(!consumer_lock_held(name.base()).unwrap());
        name.remove().unwrap();
    }

    #[test]
    fn consumer_lock_survives_unlink_race() {
        let name = unique_bus_name();
        let held = ConsumerLock::acquire(name.base()).unwrap();
        remove_consumer_lock(name.base()).unwrap();
        // A fresh consumer must end up on the file probes look at.
        let fresh = ConsumerLock::acquire(name.base()).unwrap();
        assert!(consumer_lock_held(name.base()).unwrap());
        drop(held);
        drop(fresh);
        name.remove().unwrap();
    }

    #[test]
    fn region_is_shared_between_mappings() {
        let name = unique_bus_name();
        let a = Region::open_or_create(&name.buffer_object(), 4096).unwrap();
        let b = Region::open_or_create(&name.buffer_object(), 4096).unwrap();
        assert_eq!(a.len(), 4096);
        // SAFETY: both mappings are 4096 bytes long.
        unsafe {
            assert_eq!(*b.as_ptr().add(100), 0);
            *a.as_ptr().add(100) = 0x5A;
            assert_eq!(*b.as_ptr().add(100), 0x5A);
        }
        name.remove().unwrap();
    }
}
