//! dbwinfwd: forward process output into the DBWIN debug-message bus.
//!
//! Also carries a consumer (`listen`) and a probe so the bus can be used
//! end to end without a separate viewer.

use clap::Parser;
use dbwinfwd_bus::is_consumer_active;
use dbwinfwd_forward::classify_stdin;
use tokio_util::sync::CancellationToken;

mod cli;
mod config;
mod listen;
mod session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // stdout is reserved for forwarded or listened lines.
    let filter = std::env::var("DBWINFWD_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let config = config::BusConfig::from_cli(&args)?;

    let command = match args.command {
        Some(command) => command,
        None => {
            let kind = classify_stdin();
            if !kind.is_redirected() {
                anyhow::bail!("nothing to forward: stdin is not redirected (see --help)");
            }
            tracing::debug!(?kind, "stdin is redirected, forwarding it");
            cli::Command::Pipe
        }
    };

    let cancel = CancellationToken::new();
    session::cancel_on_ctrl_c(cancel.clone());

    let exit_code = match command {
        cli::Command::Run(opts) => {
            let source = session::Source::Child {
                program: opts.program,
                args: opts.args,
            };
            session::run_session(config, source, cancel).await?
        }
        cli::Command::Pipe => session::run_session(config, session::Source::Stdin, cancel).await?,
        cli::Command::File(opts) => {
            let source = session::Source::File {
                path: opts.path,
                pid: opts.pid,
            };
            session::run_session(config, source, cancel).await?
        }
        cli::Command::Listen => listen::cmd_listen(config.name, cancel).await?,
        cli::Command::Probe => {
            let active = is_consumer_active(&config.name);
            tracing::info!(bus = %config.name, active, "probed debug bus");
            if active { 0 } else { 1 }
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
