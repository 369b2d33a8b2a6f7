//! Terminal status output.
//!
//! Every status line goes to stderr as a right-aligned label followed by a
//! message, e.g. `    Building myapp for linux_amd64`. Labels are bold and
//! colored when stderr is a terminal and plain otherwise.

use console::{Color, Term, style};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Width labels are right-aligned to.
const LABEL_WIDTH: usize = 12;

/// Kind of status line, which decides the label color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status<'a> {
    /// Work starting, in cyan.
    Action(&'a str),
    /// Work finished, in green.
    Success(&'a str),
    /// Work failed, in red.
    Fail(&'a str),
    /// A yellow `Note` line.
    Note,
    /// An indented, dim line with no label.
    Detail,
}

impl Status<'_> {
    fn label(&self) -> Option<(&str, Color)> {
        match *self {
            Status::Action(label) => Some((label, Color::Cyan)),
            Status::Success(label) => Some((label, Color::Green)),
            Status::Fail(label) => Some((label, Color::Red)),
            Status::Note => Some(("Note", Color::Yellow)),
            Status::Detail => None,
        }
    }
}

/// Write one status line to `w`, styled only when `is_tty` is set.
pub fn write_line(
    w: &mut dyn Write,
    status: Status<'_>,
    msg: &str,
    is_tty: bool,
) -> io::Result<()> {
    let Some((label, color)) = status.label() else {
        let line = format!("{:width$}{msg}", "", width = LABEL_WIDTH + 1);
        if is_tty {
            return writeln!(w, "{}", style(line).dim());
        }
        return writeln!(w, "{line}");
    };

    let padded = format!("{label:>width$}", width = LABEL_WIDTH);
    let label = if is_tty {
        style(padded).bold().fg(color).to_string()
    } else {
        padded
    };
    if msg.is_empty() {
        writeln!(w, "{label}")
    } else {
        writeln!(w, "{label} {msg}")
    }
}

/// Write a status line to stderr.
pub fn emit(status: Status<'_>, msg: &str) {
    let _ = write_line(&mut io::stderr(), status, msg, stderr_is_tty());
}

pub fn stderr_is_tty() -> bool {
    Term::stderr().is_term()
}

pub fn action(label: &str, msg: &str) {
    emit(Status::Action(label), msg);
}

pub fn fail(label: &str, msg: &str) {
    emit(Status::Fail(label), msg);
}

pub fn note(msg: &str) {
    emit(Status::Note, msg);
}

pub fn detail(msg: &str) {
    emit(Status::Detail, msg);
}

/// Print a detail line only when verbose output is enabled.
pub fn verbose(msg: &str) {
    if is_verbose() {
        detail(msg);
    }
}

pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}
