//! Transport over caller-provided pipes.

use tokio::io::{AsyncRead, AsyncWrite};

use super::{Pipes, Transport};
use crate::error::{Error, Result};

/// Wraps pipes the caller already owns, e.g. channels of an established SSH
/// session. Terminating is a no-op; dropping the pipes is the only teardown.
#[derive(Debug)]
pub struct PipeTransport<W, R, E> {
    pipes: Option<Pipes<W, R, E>>,
}

impl<W, R, E> PipeTransport<W, R, E> {
    pub const fn new(stdin: W, stdout: R, stderr: E) -> Self {
        Self {
            pipes: Some(Pipes {
                stdin,
                stdout,
                stderr,
            }),
        }
    }
}

impl<W, R, E> Transport for PipeTransport<W, R, E>
where
    W: AsyncWrite + Send + Unpin + 'static,
    R: AsyncRead + Send + Unpin + 'static,
    E: AsyncRead + Send + Unpin + 'static,
{
    type Stdin = W;
    type Stdout = R;
    type Stderr = E;

    fn take_pipes(&mut self) -> Result<Pipes<W, R, E>> {
        self.pipes.take().ok_or(Error::MissingPipe("stdin"))
    }

    async fn terminate(&mut self) -> Result<()> {
        Ok(())
    }
}
