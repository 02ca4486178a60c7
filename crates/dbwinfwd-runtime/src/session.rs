//! Forwarding sessions driven from the CLI.
//!
//! The blocking core runs on `spawn_blocking`; Ctrl-C fires a shared
//! cancellation token. When no consumer is listening (and `--force` was not
//! given) lines are echoed to stdout as `[pid] text` instead.

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use dbwinfwd_bus::{DebugBusWriter, WaitPolicy, is_consumer_active};
use dbwinfwd_forward::{
    ForwardError, ForwardSummary, ForwardingLoop, LinePublisher, file_lines, parent_process_id,
    stdin_lines,
};
use dbwinfwd_process::ChildProcess;
use tokio_util::sync::CancellationToken;

use crate::config::BusConfig;

/// Exit code for a session stopped by Ctrl-C.
pub const EXIT_INTERRUPTED: i32 = 130;

/// How long a cancelled session may take to unwind before we stop waiting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Where a session's lines come from.
#[derive(Debug)]
pub enum Source {
    Child { program: OsString, args: Vec<OsString> },
    Stdin,
    File { path: PathBuf, pid: Option<u32> },
}

/// Destination for forwarded lines.
pub enum Sink {
    Bus(DebugBusWriter),
    Local,
}

impl Sink {
    /// Open the bus, or fall back to local echo when nobody is listening.
    pub fn open(config: &BusConfig) -> anyhow::Result<Self> {
        if !config.force && !is_consumer_active(&config.name) {
            tracing::warn!(bus = %config.name, "no debug bus consumer detected, echoing to stdout");
            return Ok(Sink::Local);
        }
        let writer = DebugBusWriter::open(&config.name)
            .with_context(|| format!("failed to open debug bus {}", config.name))?
            .with_oversize_policy(config.oversize);
        Ok(Sink::Bus(writer))
    }
}

impl LinePublisher for Sink {
    fn publish_line(
        &self,
        pid: u32,
        text: &[u8],
        wait: WaitPolicy<'_>,
    ) -> Result<(), ForwardError> {
        match self {
            Sink::Bus(writer) => writer.publish_line(pid, text, wait),
            Sink::Local => write_local(&mut io::stdout().lock(), pid, text),
        }
    }
}

/// `[pid] text`, where `text` already ends in a line feed.
pub fn format_local(pid: u32, text: &[u8]) -> Vec<u8> {
    let mut line = format!("[{pid}] ").into_bytes();
    line.extend_from_slice(text);
    line
}

fn write_local(out: &mut impl Write, pid: u32, text: &[u8]) -> Result<(), ForwardError> {
    out.write_all(&format_local(pid, text))
        .and_then(|()| out.flush())
        .map_err(ForwardError::Write)
}

/// Fire `cancel` on Ctrl-C.
pub fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupted, stopping");
                cancel.cancel();
            }
            Err(e) => tracing::warn!("cannot listen for Ctrl-C: {e}"),
        }
    });
}

/// Run one forwarding session to completion. Returns the process exit code.
pub async fn run_session(
    config: BusConfig,
    source: Source,
    cancel: CancellationToken,
) -> anyhow::Result<i32> {
    let sink = Sink::open(&config)?;
    let publish_timeout = config.publish_timeout;
    let worker_cancel = cancel.clone();

    let worker = tokio::task::spawn_blocking(move || {
        forward_blocking(sink, source, publish_timeout, worker_cancel)
    });

    // A blocked stdin read cannot be interrupted; give up on it after a grace period.
    let abandoned = async {
        cancel.cancelled().await;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    };

    let result = tokio::select! {
        joined = worker => joined.context("forwarding task panicked")?,
        () = abandoned => {
            tracing::debug!("forwarding task did not stop in time");
            return Ok(EXIT_INTERRUPTED);
        }
    };

    match result {
        Ok(summary) => {
            tracing::info!(published = summary.published, skipped = summary.skipped, "session finished");
            Ok(summary.exit_code())
        }
        Err(ForwardError::Cancelled { published }) => {
            tracing::info!(published, "session cancelled");
            Ok(EXIT_INTERRUPTED)
        }
        Err(e) => Err(e.into()),
    }
}

fn forward_blocking(
    sink: Sink,
    source: Source,
    publish_timeout: Option<Duration>,
    cancel: CancellationToken,
) -> Result<ForwardSummary, ForwardError> {
    let session = |pid: u32| {
        let session = ForwardingLoop::new(&sink, pid).with_cancel(cancel.clone());
        match publish_timeout {
            Some(limit) => session.with_publish_timeout(limit),
            None => session,
        }
    };

    match source {
        Source::Child { program, args } => {
            let mut child = ChildProcess::launch(&program, &args)?;
            // Nothing feeds the child; closing its stdin lets readers like `cat` finish.
            drop(child.take_stdin());
            tracing::info!(pid = child.pid(), command_line = child.command_line(), "child launched");
            let outcome = session(child.pid()).run_child(&mut child)?;
            Ok(outcome.summary)
        }
        Source::Stdin => {
            let pid = parent_process_id().unwrap_or_else(std::process::id);
            tracing::info!(pid, "forwarding stdin");
            session(pid).run(stdin_lines())
        }
        Source::File { path, pid } => {
            let pid = pid.unwrap_or_else(std::process::id);
            let lines = file_lines(&path)?;
            tracing::info!(pid, path = %path.display(), "forwarding file");
            session(pid).run(lines)
        }
    }
}
