//! Events passed from the stream readers to the session coordinator.

use std::fmt;

/// Which output stream of the shell a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message on the session's event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// One complete line of output, without its trailing newline.
    Line { stream: StreamKind, text: String },
    /// The exit status marker was seen on `stream`.
    Complete { stream: StreamKind, status: String },
    /// Reading `stream` failed outside of shutdown; the reader has stopped.
    Fatal { stream: StreamKind, message: String },
}
