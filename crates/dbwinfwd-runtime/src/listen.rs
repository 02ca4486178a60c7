//! `dbwinfwd listen`: a minimal consumer that prints what arrives on the bus.

use std::io::{self, Write};

use anyhow::Context;
use dbwinfwd_bus::{BusMessage, BusName, DebugBusReader};
use tokio_util::sync::CancellationToken;

use crate::session::EXIT_INTERRUPTED;

/// `pid<TAB>text` with the message's own line ending removed.
pub fn format_message(message: &BusMessage) -> String {
    let lossy = message.text_lossy();
    let text = lossy.strip_suffix('\n').unwrap_or(&lossy);
    let text = text.strip_suffix('\r').unwrap_or(text);
    format!("{}\t{}", message.pid, text)
}

/// Print messages until Ctrl-C.
pub async fn cmd_listen(name: BusName, cancel: CancellationToken) -> anyhow::Result<i32> {
    tokio::task::spawn_blocking(move || listen_blocking(&name, &cancel))
        .await
        .context("listener task panicked")?
}

fn listen_blocking(name: &BusName, cancel: &CancellationToken) -> anyhow::Result<i32> {
    let reader = DebugBusReader::open(name)
        .with_context(|| format!("failed to open debug bus {name} as consumer"))?;
    let mut received = 0u64;
    while let Some(message) = reader.read_cancellable(cancel)? {
        received += 1;
        let mut out = io::stdout().lock();
        writeln!(out, "{}", format_message(&message)).context("failed to write to stdout")?;
        out.flush().context("failed to write to stdout")?;
    }
    tracing::info!(received, "listener stopped");
    Ok(EXIT_INTERRUPTED)
}
