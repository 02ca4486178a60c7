//! Command-line rendering for spawned children.
//!
//! The executable path is always wrapped in double quotes. Each argument is
//! quoted only when it is empty or contains whitespace or `"`; inside quotes,
//! a run of backslashes followed by `"` is doubled and the quote escaped, and
//! a trailing run of backslashes is doubled before the closing quote. These
//! are the MSVC `CommandLineToArgvW` rules, so every argument round-trips as
//! exactly one argv entry.

use std::ffi::OsStr;
use std::iter::repeat_n;

/// Quote one argument for a Windows-style command line.
pub fn quote_argument(arg: &str) -> String {
    let needs_quotes =
        arg.is_empty() || arg.contains(|c: char| matches!(c, ' ' | '\t' | '\n' | '\x0b' | '"'));
    if !needs_quotes {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => {
                backslashes += 1;
                quoted.push('\\');
            }
            '"' => {
                // n backslashes already pushed; n more plus one escape the quote.
                quoted.extend(repeat_n('\\', backslashes + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                backslashes = 0;
                quoted.push(c);
            }
        }
    }
    quoted.extend(repeat_n('\\', backslashes));
    quoted.push('"');
    quoted
}

/// Render `"<program>" arg1 arg2 …` using [`quote_argument`] for each argument.
pub fn render_command_line<I, S>(program: &OsStr, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut line = format!("\"{}\"", program.to_string_lossy());
    for arg in args {
        line.push(' ');
        line.push_str(&quote_argument(&arg.as_ref().to_string_lossy()));
    }
    line
}
