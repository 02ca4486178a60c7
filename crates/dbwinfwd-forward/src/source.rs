//! Line sources for forwarding sessions.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use dbwinfwd_process::{ChildProcess, LineStream};

use crate::error::ForwardError;

/// A line stream over any owned, sendable reader.
pub type BoxedLines = LineStream<Box<dyn Read + Send>>;

/// What this process's stdin is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinKind {
    File,
    Pipe,
    Terminal,
    Other,
}

impl StdinKind {
    /// Whether forwarding stdin makes sense without being asked for it.
    pub fn is_redirected(self) -> bool {
        matches!(self, StdinKind::File | StdinKind::Pipe)
    }
}

/// Lines from a child's merged stdout/stderr. Takes the pipe out of `child`.
pub fn child_lines(child: &mut ChildProcess) -> Result<BoxedLines, ForwardError> {
    let stdout = child
        .take_stdout()
        .ok_or_else(|| ForwardError::Source(format!("stdout of {} already taken", child.name())))?;
    Ok(LineStream::new(Box::new(stdout)))
}

/// Lines from this process's stdin.
pub fn stdin_lines() -> BoxedLines {
    LineStream::new(Box::new(io::stdin()))
}

/// Lines from a file on disk.
pub fn file_lines(path: impl AsRef<Path>) -> Result<BoxedLines, ForwardError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ForwardError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "opened line source file");
    Ok(LineStream::new(Box::new(file)))
}

/// Classify this process's stdin. Falls back to `Other` when it cannot be inspected.
pub fn classify_stdin() -> StdinKind {
    match imp::classify_stdin() {
        Ok(kind) => kind,
        Err(e) => {
            tracing::debug!("cannot inspect stdin: {e}");
            StdinKind::Other
        }
    }
}

#[cfg(unix)]
mod imp {
    use std::fs::File;
    use std::io::{self, IsTerminal};
    use std::os::fd::{AsFd, BorrowedFd};
    use std::os::unix::fs::FileTypeExt;

    use super::StdinKind;

    pub(super) fn classify_stdin() -> io::Result<StdinKind> {
        classify_fd(io::stdin().as_fd())
    }

    pub(super) fn classify_fd(fd: BorrowedFd<'_>) -> io::Result<StdinKind> {
        if fd.is_terminal() {
            return Ok(StdinKind::Terminal);
        }
        let file_type = File::from(fd.try_clone_to_owned()?).metadata()?.file_type();
        Ok(if file_type.is_file() {
            StdinKind::File
        } else if file_type.is_fifo() || file_type.is_socket() {
            StdinKind::Pipe
        } else {
            StdinKind::Other
        })
    }
}

#[cfg(windows)]
mod imp {
    use std::io::{self, IsTerminal};
    use std::os::windows::io::AsRawHandle;

    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::Storage::FileSystem::{
        FILE_TYPE_CHAR, FILE_TYPE_DISK, FILE_TYPE_PIPE, GetFileType,
    };

    use super::StdinKind;

    pub(super) fn classify_stdin() -> io::Result<StdinKind> {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            return Ok(StdinKind::Terminal);
        }
        // SAFETY: the handle is owned by std's stdin and outlives this call.
        let file_type = unsafe { GetFileType(HANDLE(stdin.as_raw_handle())) };
        Ok(match file_type {
            FILE_TYPE_DISK => StdinKind::File,
            FILE_TYPE_PIPE => StdinKind::Pipe,
            FILE_TYPE_CHAR => StdinKind::Terminal,
            _ => StdinKind::Other,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn file_lines_reads_every_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"first\r\nsecond\nthird").unwrap();
        let lines: Vec<Vec<u8>> = file_lines(file.path()).unwrap().map(Result::unwrap).collect();
        assert_eq!(lines, vec![b"first\r".to_vec(), b"second".to_vec(), b"third".to_vec()]);
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.log");
        match file_lines(&missing) {
            Err(ForwardError::Open { path, .. }) => assert_eq!(path, missing),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("opened a missing file"),
        }
    }

    #[test]
    fn redirected_kinds() {
        assert!(StdinKind::File.is_redirected());
        assert!(StdinKind::Pipe.is_redirected());
        assert!(!StdinKind::Terminal.is_redirected());
        assert!(!StdinKind::Other.is_redirected());
    }

    #[cfg(unix)]
    #[test]
    fn classify_regular_file_and_pipe() {
        use std::os::fd::AsFd;

        let file = tempfile::tempfile().unwrap();
        assert_eq!(imp::classify_fd(file.as_fd()).unwrap(), StdinKind::File);

        let (reader, _writer) = std::io::pipe().unwrap();
        assert_eq!(imp::classify_fd(reader.as_fd()).unwrap(), StdinKind::Pipe);
    }

    #[cfg(unix)]
    #[test]
    fn child_lines_takes_the_pipe_once() {
        let mut child = ChildProcess::launch("/bin/sh", ["-c", "echo a; echo b"]).unwrap();
        let lines: Vec<Vec<u8>> = child_lines(&mut child).unwrap().map(Result::unwrap).collect();
        assert_eq!(lines, vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(matches!(child_lines(&mut child), Err(ForwardError::Source(_))));
        child.wait().unwrap();
    }
}
