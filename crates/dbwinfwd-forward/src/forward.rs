//! The forwarding loop.
//!
//! Per line: strip one trailing CR, drop the line if nothing is left,
//! append a single LF (consumers expect one) and publish it tagged with the
//! session's pid. Lines go out in source order, one in flight at a time.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use dbwinfwd_bus::{BusError, DebugBusWriter, WaitPolicy};
use dbwinfwd_process::{ChildProcess, ProcessError};
use tokio_util::sync::CancellationToken;

use crate::error::ForwardError;
use crate::source::child_lines;

/// How often a child session checks for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Sink for forwarded lines. Enables mock injection for testing.
///
/// A bus sink reports `ForwardError::Publish`; a cancelled wait must come
/// back as `Publish(BusError::Cancelled)`.
pub trait LinePublisher: Send + Sync {
    fn publish_line(&self, pid: u32, text: &[u8], wait: WaitPolicy<'_>)
    -> Result<(), ForwardError>;
}

impl<T: LinePublisher + ?Sized> LinePublisher for &T {
    fn publish_line(
        &self,
        pid: u32,
        text: &[u8],
        wait: WaitPolicy<'_>,
    ) -> Result<(), ForwardError> {
        (**self).publish_line(pid, text, wait)
    }
}

impl LinePublisher for DebugBusWriter {
    fn publish_line(
        &self,
        pid: u32,
        text: &[u8],
        wait: WaitPolicy<'_>,
    ) -> Result<(), ForwardError> {
        Ok(self.publish_with(pid, text, wait)?)
    }
}

/// Counters for one finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardSummary {
    pub published: u64,
    /// Lines that were empty after CR stripping.
    pub skipped: u64,
}

impl ForwardSummary {
    /// Process exit code for a session that ran to exhaustion.
    pub fn exit_code(&self) -> i32 {
        0
    }
}

/// Result of forwarding a child's output.
#[derive(Debug)]
pub struct ChildOutcome {
    pub summary: ForwardSummary,
    pub status: ExitStatus,
}

pub struct ForwardingLoop<P> {
    publisher: P,
    pid: u32,
    cancel: Option<CancellationToken>,
    publish_timeout: Option<Duration>,
}

impl<P: LinePublisher> ForwardingLoop<P> {
    /// A session that tags every line with `pid`.
    pub fn new(publisher: P, pid: u32) -> Self {
        Self {
            publisher,
            pid,
            cancel: None,
            publish_timeout: None,
        }
    }

    /// Stop between lines (and abandon a blocked publish) once `cancel` fires.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Fail instead of blocking forever when the slot stays busy.
    #[must_use]
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = Some(timeout);
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Forward every line from `lines` until it is exhausted.
    pub fn run<I>(&self, lines: I) -> Result<ForwardSummary, ForwardError>
    where
        I: IntoIterator<Item = io::Result<Vec<u8>>>,
    {
        let mut summary = ForwardSummary::default();
        tracing::debug!(pid = self.pid, "forwarding session started");

        for line in lines {
            self.check_cancelled(&summary)?;

            let mut line = line.map_err(ForwardError::Read)?;
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.is_empty() {
                summary.skipped += 1;
                continue;
            }
            line.push(b'\n');

            match self.publisher.publish_line(self.pid, &line, self.wait_policy()) {
                Ok(()) => summary.published += 1,
                Err(ForwardError::Publish(BusError::Cancelled)) => {
                    return Err(ForwardError::Cancelled {
                        published: summary.published,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        self.check_cancelled(&summary)?;
        tracing::debug!(
            pid = self.pid,
            published = summary.published,
            skipped = summary.skipped,
            "forwarding session finished"
        );
        Ok(summary)
    }

    /// Forward a child's stdout until EOF, then reap it.
    ///
    /// On cancellation the child is killed so its pipe reaches EOF. On any
    /// error the child is killed and reaped before the error is returned.
    pub fn run_child(&self, child: &mut ChildProcess) -> Result<ChildOutcome, ForwardError> {
        let lines = child_lines(child)?;
        let pid = child.pid();

        let result = match &self.cancel {
            None => self.run(lines),
            Some(cancel) => {
                let done = CancellationToken::new();
                std::thread::scope(|scope| {
                    let watcher = scope.spawn(|| kill_on_cancel(child, cancel, &done));
                    let result = self.run(lines);
                    done.cancel();
                    match watcher.join() {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!(pid, "failed to kill cancelled child: {e}"),
                        Err(panic) => std::panic::resume_unwind(panic),
                    }
                    result
                })
            }
        };

        match result {
            Ok(summary) => {
                let status = child.wait()?;
                tracing::info!(pid, name = child.name(), %status, "child exited");
                Ok(ChildOutcome { summary, status })
            }
            Err(e) => {
                if let Err(kill_err) = child.kill() {
                    tracing::warn!(pid, "failed to kill child after error: {kill_err}");
                }
                child.wait()?;
                Err(e)
            }
        }
    }

    fn wait_policy(&self) -> WaitPolicy<'_> {
        match (&self.cancel, self.publish_timeout) {
            (Some(cancel), limit) => WaitPolicy::Cancellable(cancel, limit),
            (None, Some(limit)) => WaitPolicy::Timeout(limit),
            (None, None) => WaitPolicy::Forever,
        }
    }

    fn check_cancelled(&self, summary: &ForwardSummary) -> Result<(), ForwardError> {
        match &self.cancel {
            Some(cancel) if cancel.is_cancelled() => Err(ForwardError::Cancelled {
                published: summary.published,
            }),
            _ => Ok(()),
        }
    }
}

/// Kill `child` when `cancel` fires; return quietly once `done` fires.
fn kill_on_cancel(
    child: &mut ChildProcess,
    cancel: &CancellationToken,
    done: &CancellationToken,
) -> Result<(), ProcessError> {
    loop {
        if done.is_cancelled() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            tracing::info!(pid = child.pid(), "cancelling child session");
            return child.kill();
        }
        std::thread::sleep(CANCEL_POLL_INTERVAL);
    }
}
