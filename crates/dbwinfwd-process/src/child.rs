//! Child process with redirected standard streams.
//!
//! The child's stdin is a fresh pipe; its stdout and stderr share a second
//! pipe so that everything the program prints arrives on one reader. The
//! parent keeps only its own ends. The child's ends are moved into the
//! [`Command`] and dropped with it right after spawn, so the reader sees EOF
//! as soon as the child (and any grandchildren holding the pipe) exit.

use std::ffi::{OsStr, OsString};
use std::io::PipeReader;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::command_line::render_command_line;
use crate::error::ProcessError;

/// Poll interval for bounded and cancellable waits.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A launched child process. Dropping it releases every handle it owns
/// without killing or reaping the process.
///
/// Only the process id is kept. `std::process::Child` does not surface the
/// primary thread, so its id and handle are dropped at launch; on Windows
/// they could only be recovered with a ToolHelp thread snapshot.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    pid: u32,
    name: String,
    command_line: String,
    stdin: Option<ChildStdin>,
    stdout: Option<PipeReader>,
}

impl ChildProcess {
    /// Launch `program` with `args`, wiring stdin to a writable pipe and
    /// stdout/stderr to one readable pipe.
    pub fn launch<P, I, S>(program: P, args: I) -> Result<Self, ProcessError>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref();
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        let launch_err = |source| ProcessError::Launch {
            program: program.display().to_string(),
            source,
        };

        let (stdout_reader, stdout_writer) = std::io::pipe().map_err(launch_err)?;
        let stderr_writer = stdout_writer.try_clone().map_err(launch_err)?;

        let mut command = Command::new(program);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(stdout_writer)
            .stderr(stderr_writer);
        hide_window(&mut command);

        let spawned = command.spawn();
        // Close the parent's copies of the child's pipe ends.
        drop(command);
        let mut child = spawned.map_err(launch_err)?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let command_line = render_command_line(program.as_os_str(), &args);
        let name = display_name(program);

        tracing::debug!(pid, %name, %command_line, "child process launched");

        Ok(Self {
            child,
            pid,
            name,
            command_line,
            stdin,
            stdout: Some(stdout_reader),
        })
    }

    /// OS process identifier.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Final path component of the executable path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The rendered command line (see [`crate::command_line`]).
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Writable end of the child's stdin, if it has not been taken.
    pub fn stdin(&mut self) -> Option<&mut ChildStdin> {
        self.stdin.as_mut()
    }

    /// Readable end of the child's stdout/stderr, if it has not been taken.
    pub fn stdout(&mut self) -> Option<&mut PipeReader> {
        self.stdout.as_mut()
    }

    /// Move the stdin writer out. Dropping it closes the child's stdin.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Move the stdout reader out, e.g. into a [`crate::LineStream`].
    pub fn take_stdout(&mut self) -> Option<PipeReader> {
        self.stdout.take()
    }

    /// Non-blocking liveness check.
    ///
    /// `Err` means the status query itself failed, not that the process exited.
    pub fn is_running(&mut self) -> Result<bool, ProcessError> {
        match self.child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(_)) => Ok(false),
            Err(source) => Err(ProcessError::Query {
                pid: self.pid,
                source,
            }),
        }
    }

    /// Block until the process terminates.
    pub fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        self.child.wait().map_err(|source| ProcessError::Wait {
            pid: self.pid,
            source,
        })
    }

    /// Block until the process terminates or `timeout` elapses.
    /// Returns `Ok(None)` on timeout.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>, ProcessError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_status()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Block until the process terminates or `cancel` fires.
    /// Returns `Ok(None)` when cancelled; the process keeps running.
    pub fn wait_cancellable(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<ExitStatus>, ProcessError> {
        loop {
            if let Some(status) = self.try_status()? {
                return Ok(Some(status));
            }
            if cancel.is_cancelled() {
                return Ok(None);
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Forcefully terminate the process. Succeeds if it has already exited.
    pub fn kill(&mut self) -> Result<(), ProcessError> {
        self.child.kill().map_err(|source| ProcessError::Kill {
            pid: self.pid,
            source,
        })
    }

    fn try_status(&mut self) -> Result<Option<ExitStatus>, ProcessError> {
        self.child.try_wait().map_err(|source| ProcessError::Wait {
            pid: self.pid,
            source,
        })
    }
}

fn display_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

#[cfg(windows)]
fn hide_window(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    use windows::Win32::System::Threading::CREATE_NO_WINDOW;

    command.creation_flags(CREATE_NO_WINDOW.0);
}

#[cfg(not(windows))]
fn hide_window(_command: &mut Command) {}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn sh(script: &str) -> ChildProcess {
        ChildProcess::launch("/bin/sh", ["-c", script]).expect("sh must be available")
    }

    #[test]
    fn launch_missing_program_fails() {
        let err = ChildProcess::launch("/nonexistent/dbwinfwd-test-binary", ["x"]).unwrap_err();
        match err {
            ProcessError::Launch { program, source } => {
                assert!(program.contains("dbwinfwd-test-binary"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected Launch error, got: {other:?}"),
        }
    }

    #[test]
    fn name_is_final_path_component() {
        let mut child = sh("exit 0");
        assert_eq!(child.name(), "sh");
        assert_eq!(child.command_line(), "\"/bin/sh\" -c \"exit 0\"");
        child.wait().unwrap();
    }

    #[test]
    fn reads_stdout_until_eof() {
        let mut child = sh("printf 'hello\\nworld\\n'");
        let mut out = String::new();
        child.stdout().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello\nworld\n");
        assert!(child.wait().unwrap().success());
    }

    #[test]
    fn stderr_is_merged_into_stdout() {
        let mut child = sh("echo out; echo err 1>&2");
        let mut out = String::new();
        child.take_stdout().unwrap().read_to_string(&mut out).unwrap();
        assert!(out.contains("out\n"), "out was: {out:?}");
        assert!(out.contains("err\n"), "out was: {out:?}");
        child.wait().unwrap();
    }

    #[test]
    fn stdin_reaches_child() {
        let mut child = ChildProcess::launch("cat", Vec::<&str>::new()).unwrap();
        let mut stdin = child.take_stdin().unwrap();
        stdin.write_all(b"ping\n").unwrap();
        drop(stdin);
        let mut out = String::new();
        child.stdout().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "ping\n");
        child.wait().unwrap();
    }

    #[test]
    fn is_running_tracks_lifetime() {
        let mut child = sh("sleep 5");
        assert!(child.is_running().unwrap());
        child.kill().unwrap();
        child.wait().unwrap();
        assert!(!child.is_running().unwrap());
    }

    #[test]
    fn is_running_false_after_normal_exit() {
        let mut child = sh("exit 3");
        let status = child.wait().unwrap();
        assert_eq!(status.code(), Some(3));
        assert!(!child.is_running().unwrap());
    }

    #[test]
    fn wait_timeout_expires_for_long_running_child() {
        let mut child = sh("sleep 5");
        let started = Instant::now();
        assert!(child.wait_timeout(Duration::from_millis(100)).unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(4));
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn wait_timeout_returns_status_after_exit() {
        let mut child = sh("exit 0");
        let status = child.wait_timeout(Duration::from_secs(10)).unwrap();
        assert!(status.expect("child exited").success());
    }

    #[test]
    fn wait_cancellable_returns_none_when_cancelled() {
        let mut child = sh("sleep 5");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(child.wait_cancellable(&cancel).unwrap().is_none());
        child.kill().unwrap();
        child.wait().unwrap();
    }
}
