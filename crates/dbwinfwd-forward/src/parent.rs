//! Parent process lookup.

/// Pid of the process that started this one, if it can be determined.
///
/// Lines forwarded from stdin are attributed to this process, since it
/// is the one producing them.
pub fn parent_process_id() -> Option<u32> {
    imp::parent_process_id()
}

#[cfg(unix)]
mod imp {
    pub(super) fn parent_process_id() -> Option<u32> {
        Some(std::os::unix::process::parent_id())
    }
}

#[cfg(windows)]
mod imp {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
        TH32CS_SNAPPROCESS,
    };

    pub(super) fn parent_process_id() -> Option<u32> {
        let own = std::process::id();
        // SAFETY: the snapshot handle is closed before returning and the entry
        // carries its own size as the API requires.
        unsafe {
            let snapshot = match CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::debug!("process snapshot failed: {e}");
                    return None;
                }
            };
            let mut entry = PROCESSENTRY32W {
                dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
                ..Default::default()
            };
            let mut parent = None;
            let mut more = Process32FirstW(snapshot, &mut entry).is_ok();
            while more {
                if entry.th32ProcessID == own {
                    parent = Some(entry.th32ParentProcessID);
                    break;
                }
                more = Process32NextW(snapshot, &mut entry).is_ok();
            }
            let _ = CloseHandle(snapshot);
            parent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_differs_from_self() {
        let parent = parent_process_id().unwrap();
        assert_ne!(parent, std::process::id());
    }
}
