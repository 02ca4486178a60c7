//! CLI definition using clap derive.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use dbwinfwd_bus::{DEFAULT_BUS_NAME, OversizePolicy};

#[derive(Parser)]
#[command(
    name = "dbwinfwd",
    version,
    about = "Forward process output into the DBWIN debug-message bus"
)]
pub struct Cli {
    /// Base name of the bus objects
    #[arg(long, global = true, env = "DBWINFWD_BUS_NAME", default_value = DEFAULT_BUS_NAME)]
    pub bus_name: String,

    /// Use the session-global namespace (Windows `Global\` prefix)
    #[arg(long, global = true)]
    pub global: bool,

    /// Give up on a line after waiting this long for the slot
    #[arg(long, global = true, env = "DBWINFWD_PUBLISH_TIMEOUT_MS")]
    pub publish_timeout_ms: Option<u64>,

    /// What to do with lines longer than one slot
    #[arg(long, global = true, value_enum, default_value_t = Oversize::Truncate)]
    pub oversize: Oversize,

    /// Publish even when no consumer is listening
    #[arg(long, global = true)]
    pub force: bool,

    /// Defaults to `pipe` when stdin is redirected
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Launch a program and forward its stdout and stderr
    Run(RunOpts),
    /// Forward lines read from stdin, tagged with the parent pid
    Pipe,
    /// Forward the lines of a file
    File(FileOpts),
    /// Act as the consumer and print messages as `pid<TAB>text`
    Listen,
    /// Exit 0 if a consumer is listening, 1 otherwise
    Probe,
}

#[derive(clap::Args, Debug, PartialEq, Eq)]
pub struct RunOpts {
    /// Program to launch
    pub program: OsString,

    /// Arguments passed to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<OsString>,
}

#[derive(clap::Args, Debug, PartialEq, Eq)]
pub struct FileOpts {
    pub path: PathBuf,

    /// Tag lines with this pid instead of our own
    #[arg(long)]
    pub pid: Option<u32>,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Oversize {
    #[default]
    Truncate,
    Reject,
}

impl From<Oversize> for OversizePolicy {
    fn from(value: Oversize) -> Self {
        match value {
            Oversize::Truncate => OversizePolicy::Truncate,
            Oversize::Reject => OversizePolicy::Reject,
        }
    }
}
