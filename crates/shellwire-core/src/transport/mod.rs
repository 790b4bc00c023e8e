//! Transports supplying the three pipes of a shell session.
//!
//! A transport owns whatever runs the shell (a local child process, an `ssh`
//! client, or caller-provided pipes). [`crate::Shell`] takes the pipes once at
//! start-up and calls [`Transport::terminate`] when the session is closed.

mod child;
mod local;
mod pipe;
mod remote;

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

pub use child::ChildTransport;
pub use pipe::PipeTransport;
pub use remote::SshTarget;

/// The command sink and the two output sources of a shell.
#[derive(Debug)]
pub struct Pipes<W, R, E> {
    pub stdin: W,
    pub stdout: R,
    pub stderr: E,
}

/// Something that can hand out shell pipes and tear the shell down.
pub trait Transport: Send + 'static {
    type Stdin: AsyncWrite + Send + Unpin + 'static;
    type Stdout: AsyncRead + Send + Unpin + 'static;
    type Stderr: AsyncRead + Send + Unpin + 'static;

    /// Take ownership of the pipes. Called exactly once per session.
    fn take_pipes(&mut self) -> Result<Pipes<Self::Stdin, Self::Stdout, Self::Stderr>>;

    /// Stop the underlying process or session after the pipes are closed.
    fn terminate(&mut self) -> impl Future<Output = Result<()>> + Send;
}
