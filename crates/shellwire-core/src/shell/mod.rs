//! Persistent shell sessions.
//!
//! A [`Shell`] keeps one shell process alive and runs commands on it one at a
//! time, reporting each output line and the command's exit status.

mod event;
mod reader;
mod session;

pub use event::{Event, StreamKind};
pub use session::{EXIT_STATUS_TRAILER, LineHandler, SessionState, Shell};
