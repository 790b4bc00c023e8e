//! Session coordinator: sends commands and collects their output and status.
//!
//! Every command is followed by [`EXIT_STATUS_TRAILER`], which prints `$?`
//! wrapped in a marker on both stdout and stderr. A command is finished once
//! the marker has been seen on both streams.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::event::{Event, StreamKind};
use super::reader::{ReaderOptions, read_stream};
use crate::config::{LocalConfig, RemoteConfig, SessionConfig};
use crate::error::{Error, HandlerError, Result};
use crate::transport::{ChildTransport, PipeTransport, Transport};

/// Line appended to every command to report its exit status on both streams.
pub const EXIT_STATUS_TRAILER: &str = "echo -n __SHELL_EXIT_STATUS_$?__ | tee /dev/stderr";

/// Callback receiving each output line of a command.
pub type LineHandler<'a> =
    dyn FnMut(StreamKind, &str) -> std::result::Result<(), HandlerError> + Send + 'a;

/// Lifecycle of a session. Only [`Shell::close`] moves it forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Per-command join of the two stream completions.
#[derive(Debug, Default)]
struct Completion {
    stdout: bool,
    stderr: bool,
    /// Status text of whichever completion arrived last.
    status: Option<String>,
}

impl Completion {
    fn record(&mut self, stream: StreamKind, status: String) {
        match stream {
            StreamKind::Stdout => self.stdout = true,
            StreamKind::Stderr => self.stderr = true,
        }
        self.status = Some(status);
    }

    const fn is_complete(&self, stream: StreamKind) -> bool {
        match stream {
            StreamKind::Stdout => self.stdout,
            StreamKind::Stderr => self.stderr,
        }
    }

    const fn is_done(&self) -> bool {
        self.stdout && self.stderr
    }

    fn exit_status(self) -> Result<i32> {
        let text = self.status.unwrap_or_default();
        text.parse().map_err(|_| Error::InvalidStatus(text))
    }
}

/// A long-lived shell process driven one command at a time.
///
/// Only one [`run`](Self::run) should be active at a time. Concurrent calls
/// wait for each other on the event queue, but their commands still race on
/// stdin.
pub struct Shell<T: Transport> {
    stdin: Mutex<Option<T::Stdin>>,
    events: Mutex<mpsc::Receiver<Event>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    transport: Mutex<T>,
    shutdown: CancellationToken,
    state: AtomicU8,
}

impl<T: Transport> std::fmt::Debug for Shell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Shell<T> {
    /// Take the transport's pipes and start both stream readers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(mut transport: T, config: &SessionConfig) -> Result<Self> {
        let pipes = transport.take_pipes()?;
        let (events_tx, events_rx) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let options = ReaderOptions {
            line_limit: config.line_limit,
            buffer_size: config.read_buffer_size,
        };

        let readers = vec![
            tokio::spawn(read_stream(
                pipes.stdout,
                StreamKind::Stdout,
                events_tx.clone(),
                shutdown.clone(),
                options.clone(),
            )),
            tokio::spawn(read_stream(
                pipes.stderr,
                StreamKind::Stderr,
                events_tx,
                shutdown.clone(),
                options,
            )),
        ];
        debug!(line_limit = config.line_limit, "Shell session started");

        Ok(Self {
            stdin: Mutex::new(Some(pipes.stdin)),
            events: Mutex::new(events_rx),
            readers: Mutex::new(readers),
            transport: Mutex::new(transport),
            shutdown,
            state: AtomicU8::new(SessionState::Open as u8),
        })
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Run `command`, passing every output line to `handler`.
    ///
    /// Returns the command's exit status. If `handler` fails, the remaining
    /// output is still drained and the status is returned inside
    /// [`Error::Handler`]; later lines are not passed to the handler.
    pub async fn run<F>(&self, command: &str, mut handler: F) -> Result<i32>
    where
        F: FnMut(StreamKind, &str) -> std::result::Result<(), HandlerError> + Send,
    {
        self.execute(command, Some(&mut handler)).await
    }

    /// Run `command` and discard its output.
    pub async fn exec(&self, command: &str) -> Result<i32> {
        self.execute(command, None).await
    }

    async fn execute(
        &self,
        command: &str,
        mut handler: Option<&mut LineHandler<'_>>,
    ) -> Result<i32> {
        if self.state() != SessionState::Open {
            return Err(Error::Closed);
        }

        let mut events = self.events.lock().await;
        self.send(command).await?;

        let mut completion = Completion::default();
        let mut handler_error: Option<HandlerError> = None;

        while !completion.is_done() {
            let Some(event) = events.recv().await else {
                return Err(Error::Closed);
            };

            match event {
                Event::Fatal { stream, message } => {
                    return Err(Error::Stream { stream, message });
                }
                Event::Complete { stream, status } => {
                    trace!(%stream, status = %status, "Stream completed");
                    completion.record(stream, status);
                }
                Event::Line { stream, .. } if completion.is_complete(stream) => {
                    trace!(%stream, "Discarding output after exit status");
                }
                Event::Line { stream, text } => {
                    if handler_error.is_some() {
                        continue;
                    }
                    if let Some(handler) = handler.as_deref_mut() {
                        if let Err(e) = handler(stream, &text) {
                            handler_error = Some(e);
                        }
                    }
                }
            }
        }
        drop(events);

        let status = completion.exit_status()?;
        debug!(status, "Command finished");
        match handler_error {
            Some(source) => Err(Error::Handler { status, source }),
            None => Ok(status),
        }
    }

    async fn send(&self, command: &str) -> Result<()> {
        let query = format!(
            "{}\n{EXIT_STATUS_TRAILER}\n",
            command.trim_end_matches('\n')
        );

        let mut stdin = self.stdin.lock().await;
        let sink = stdin.as_mut().ok_or(Error::Closed)?;
        sink.write_all(query.as_bytes()).await.map_err(Error::Write)?;
        sink.flush().await.map_err(Error::Write)
    }

    /// Close the session: ask the shell to exit, close its pipes, stop both
    /// readers and tear down the transport.
    ///
    /// Every step is attempted even if an earlier one fails; the first error
    /// is returned. Calling `close` again is a no-op.
    ///
    /// A [`run`](Self::run) in flight while closing is abandoned on a best
    /// effort basis: it usually fails with [`Error::Closed`], or with
    /// [`Error::Stream`] if a pipe broke before the readers saw the shutdown.
    pub async fn close(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(
                SessionState::Open as u8,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }
        info!("Closing shell session");
        self.shutdown.cancel();

        let mut first_error: Option<Error> = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                debug!(error = %e, "Close step failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };

        if let Some(mut stdin) = self.stdin.lock().await.take() {
            record(stdin.write_all(b"exit\n").await.map_err(Error::Write));
            record(stdin.shutdown().await.map_err(Error::Io));
        }

        let readers = std::mem::take(&mut *self.readers.lock().await);
        for reader in readers {
            record(
                reader
                    .await
                    .map_err(|e| Error::Terminate(format!("stream reader failed: {e}"))),
            );
        }

        record(self.transport.lock().await.terminate().await);

        // With both readers gone every sender is dropped; an idle receiver can
        // be closed right away, a busy one sees the channel end.
        if let Ok(mut events) = self.events.try_lock() {
            events.close();
        }

        self.state.store(SessionState::Closed as u8, Ordering::Release);
        info!("Shell session closed");
        first_error.map_or(Ok(()), Err)
    }
}

impl<T: Transport> Drop for Shell<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Shell<ChildTransport> {
    /// Start a session on a local shell process.
    pub fn local(session: &SessionConfig, local: &LocalConfig) -> Result<Self> {
        Self::start(ChildTransport::local(local)?, session)
    }

    /// Start a session on a remote shell through the ssh client.
    pub fn remote(session: &SessionConfig, remote: &RemoteConfig) -> Result<Self> {
        Self::start(ChildTransport::remote(remote)?, session)
    }
}

impl<W, R, E> Shell<PipeTransport<W, R, E>>
where
    PipeTransport<W, R, E>: Transport,
{
    /// Start a session over pipes the caller already owns.
    pub fn from_pipes(stdin: W, stdout: R, stderr: E, config: &SessionConfig) -> Result<Self> {
        Self::start(PipeTransport::new(stdin, stdout, stderr), config)
    }
}
