//! dbwinfwd-process: child process and byte-stream IO boundary.
//! Spawns programs with redirected standard streams and turns pipe output
//! into newline-delimited lines. No bus logic here.

pub mod child;
pub mod command_line;
pub mod error;
pub mod line_stream;

pub use child::ChildProcess;
pub use command_line::{quote_argument, render_command_line};
pub use error::ProcessError;
pub use line_stream::LineStream;
