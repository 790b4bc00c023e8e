//! shellwire Core Library
//!
//! Persistent shell sessions driven one command at a time:
//! - Session protocol turning stdout/stderr into lines plus an exit status
//! - Transports for local processes, `ssh` remotes and caller-owned pipes
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod shell;
pub mod transport;

pub use config::Config;
pub use error::{Error, HandlerError, Result};
pub use shell::{SessionState, Shell, StreamKind};
pub use transport::{ChildTransport, PipeTransport, Pipes, SshTarget, Transport};
