//! Error types for the shellwire core library.

use thiserror::Error;

use crate::shell::StreamKind;

/// Result type alias using shellwire Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by a line handler passed to [`crate::Shell::run`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Core error types for shell session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Writing the command to the shell's stdin failed.
    #[error("Failed to write command: {0}")]
    Write(#[source] std::io::Error),

    /// A stream reader hit a read failure while a command was running.
    #[error("Failed to read {stream}: {message}")]
    Stream { stream: StreamKind, message: String },

    /// The exit status marker did not carry an integer.
    #[error("Invalid exit status: {0:?}")]
    InvalidStatus(String),

    /// The line handler failed; the command still ran to completion.
    #[error("Line handler failed (exit status {status}): {source}")]
    Handler {
        status: i32,
        #[source]
        source: HandlerError,
    },

    /// The session has been closed.
    #[error("Shell session is closed")]
    Closed,

    /// The transport could not start the shell.
    #[error("Failed to spawn shell: {0}")]
    Spawn(String),

    /// The transport did not provide one of the three pipes.
    #[error("Missing {0} pipe")]
    MissingPipe(&'static str),

    /// Tearing down the transport failed.
    #[error("Failed to terminate shell: {0}")]
    Terminate(String),

    /// A remote target could not be parsed.
    #[error("Invalid remote address: {0}")]
    InvalidAddress(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Exit status reported alongside this error.
    ///
    /// Only a handler failure happens after the command finished, so it is the
    /// only variant that carries a real status; everything else reports `-1`.
    pub const fn exit_status(&self) -> i32 {
        match self {
            Self::Handler { status, .. } => *status,
            _ => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_keeps_status() {
        let err = Error::Handler {
            status: 3,
            source: "boom".into(),
        };
        assert_eq!(err.exit_status(), 3);
        assert!(err.to_string().contains("exit status 3"));
    }

    #[test]
    fn other_errors_report_minus_one() {
        assert_eq!(Error::Closed.exit_status(), -1);
        assert_eq!(Error::InvalidStatus("WRONG".into()).exit_status(), -1);
        let err = Error::Stream {
            stream: StreamKind::Stderr,
            message: "broken pipe".into(),
        };
        assert_eq!(err.exit_status(), -1);
        assert_eq!(err.to_string(), "Failed to read stderr: broken pipe");
    }
}
