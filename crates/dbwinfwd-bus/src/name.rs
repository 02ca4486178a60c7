//! Bus naming.
//!
//! A bus is identified by a base name; the three OS objects derive from it:
//! `<base>_BUFFER`, `<base>_BUFFER_READY`, `<base>_DATA_READY`. The default
//! base `DBWIN` is the name every native debug-output monitor listens on.

use std::fmt;
use std::str::FromStr;

use crate::error::BusError;
use crate::sys;

/// Base name of the system-wide debug bus.
pub const DEFAULT_BUS_NAME: &str = "DBWIN";

const GLOBAL_PREFIX: &str = "Global\\";
/// Suffix of the longest derived object name.
const LONGEST_SUFFIX: &str = "BUFFER_READY";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusName {
    base: String,
    global: bool,
}

impl BusName {
    /// Validate and wrap a base name. Separators and NUL are rejected, and
    /// every derived object name (in either namespace) must fit the
    /// platform's limit, which is 31 bytes on Darwin.
    pub fn new(base: impl Into<String>) -> Result<Self, BusError> {
        let base = base.into();
        let reason = if base.is_empty() {
            Some("name is empty")
        } else if sys::object_name(&base, LONGEST_SUFFIX, true).len() > sys::MAX_OBJECT_NAME_LEN {
            Some("name is too long for this platform's named objects")
        } else if base.contains(['/', '\\', '\0']) {
            Some("name contains a path separator or NUL")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(BusError::InvalidName { name: base, reason }),
            None => Ok(Self {
                base,
                global: false,
            }),
        }
    }

    /// The well-known `DBWIN` bus.
    pub fn dbwin() -> Self {
        Self {
            base: DEFAULT_BUS_NAME.to_string(),
            global: false,
        }
    }

    /// Use the `Global\` kernel namespace (Windows services / session 0).
    /// Unix has a single namespace, so this only changes the display form there.
    #[must_use]
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    /// OS name of the shared slot.
    pub fn buffer_object(&self) -> String {
        self.object("BUFFER")
    }

    /// OS name of the "slot free" signal.
    pub fn buffer_ready_object(&self) -> String {
        self.object("BUFFER_READY")
    }

    /// OS name of the "slot full" signal.
    pub fn data_ready_object(&self) -> String {
        self.object("DATA_READY")
    }

    /// Remove the named objects so the next opener starts from a fresh bus.
    ///
    /// On Unix the objects (and the consumer lock file) outlive their
    /// openers until removed; on Windows they vanish with the last handle
    /// and this is a no-op.
    pub fn remove(&self) -> std::io::Result<()> {
        sys::remove_objects(&[
            self.buffer_object(),
            self.buffer_ready_object(),
            self.data_ready_object(),
        ])?;
        sys::remove_consumer_lock(&self.base)
    }

    fn object(&self, suffix: &str) -> String {
        sys::object_name(&self.base, suffix, self.global)
    }
}

impl Default for BusName {
    fn default() -> Self {
        Self::dbwin()
    }
}

impl fmt::Display for BusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.global {
            f.write_str(GLOBAL_PREFIX)?;
        }
        f.write_str(&self.base)
    }
}

impl FromStr for BusName {
    type Err = BusError;

    /// Accepts `DBWIN` or `Global\DBWIN`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(GLOBAL_PREFIX) {
            Some(base) => Ok(Self::new(base)?.global()),
            None => Self::new(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_dbwin() {
        let name = BusName::default();
        assert_eq!(name.base(), "DBWIN");
        assert!(!name.is_global());
        assert_eq!(name.to_string(), "DBWIN");
    }

    #[cfg(unix)]
    #[test]
    fn unix_object_names_are_rooted() {
        let name = BusName::dbwin();
        assert_eq!(name.buffer_object(), "/DBWIN_BUFFER");
        assert_eq!(name.buffer_ready_object(), "/DBWIN_BUFFER_READY");
        assert_eq!(name.data_ready_object(), "/DBWIN_DATA_READY");
    }

    #[cfg(windows)]
    #[test]
    fn windows_object_names_match_dbwin_convention() {
        let name = BusName::dbwin();
        assert_eq!(name.buffer_object(), "DBWIN_BUFFER");
        assert_eq!(name.buffer_ready_object(), "DBWIN_BUFFER_READY");
        assert_eq!(name.data_ready_object(), "DBWIN_DATA_READY");
        let global = name.global();
        assert_eq!(global.buffer_object(), "Global\\DBWIN_BUFFER");
    }

    #[test]
    fn parse_global_prefix() {
        let name: BusName = "Global\\DBWIN".parse().unwrap();
        assert!(name.is_global());
        assert_eq!(name.base(), "DBWIN");
        assert_eq!(name.to_string(), "Global\\DBWIN");
    }

    #[test]
    fn rejects_empty_and_separators() {
        for bad in ["", "a/b", "a\\b", "nul\0byte"] {
            let err = BusName::new(bad).unwrap_err();
            assert!(matches!(err, BusError::InvalidName { .. }), "{bad:?}: {err:?}");
        }
    }

    #[test]
    fn rejects_name_past_platform_limit() {
        let overhead = sys::object_name("", LONGEST_SUFFIX, true).len();
        let longest = sys::MAX_OBJECT_NAME_LEN - overhead;
        assert!(BusName::new("x".repeat(longest)).is_ok());
        let err = BusName::new("x".repeat(longest + 1)).unwrap_err();
        assert!(matches!(err, BusError::InvalidName { .. }), "got: {err:?}");
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn darwin_rejects_names_sem_open_cannot_take() {
        // "/" + 17 bytes + "_BUFFER_READY" is exactly 31.
        assert!(BusName::new("x".repeat(17)).is_ok());
        assert!(BusName::new("dbwinfwd-roundtrip-1").is_err());
    }
}
