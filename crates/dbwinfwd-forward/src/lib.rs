//! dbwinfwd-forward: pump lines from a source into the debug bus.
//!
//! A forwarding session reads lines (child stdout, own stdin, or a file)
//! through [`dbwinfwd_process::LineStream`] and publishes each one, tagged
//! with a single process id, through a [`LinePublisher`].

pub mod error;
pub mod forward;
pub mod parent;
pub mod source;

pub use error::ForwardError;
pub use forward::{ChildOutcome, ForwardSummary, ForwardingLoop, LinePublisher};
pub use parent::parent_process_id;
pub use source::{BoxedLines, StdinKind, child_lines, classify_stdin, file_lines, stdin_lines};
