//! Per-stream reader turning raw shell output into line and completion events.
//!
//! Each session runs two readers, one for stdout and one for stderr. A reader
//! accumulates bytes until it sees either a newline or the exit status marker
//! written after every command, and forwards what it found to the session's
//! event queue.

use std::sync::LazyLock;

use regex::bytes::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::event::{Event, StreamKind};

/// Fixed start of the exit status marker.
const MARKER_PREFIX: &[u8] = b"__SHELL_EXIT_STATUS_";

/// Marker printed after every command, carrying `$?`.
#[allow(clippy::expect_used)]
static EXIT_STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"__SHELL_EXIT_STATUS_(\S+?)__").expect("static regex is valid")
});

/// Line reassembly state for one stream.
#[derive(Debug)]
pub(crate) struct LineAccumulator {
    stream: StreamKind,
    buffer: Vec<u8>,
    /// Maximum retained bytes of an unfinished line; 0 disables the limit.
    limit: usize,
}

impl LineAccumulator {
    pub(crate) const fn new(stream: StreamKind, limit: usize) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            limit,
        }
    }

    /// Append freshly read bytes and return the events they complete.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<Event> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        if let Some((start, end, status)) = find_exit_status(&self.buffer) {
            let output = &self.buffer[..start];
            let output = output.strip_suffix(b"\n").unwrap_or(output);
            events.extend(
                output
                    .split(|&b| b == b'\n')
                    .filter(|line| !line.is_empty())
                    .map(|line| self.line(line)),
            );
            events.push(Event::Complete {
                stream: self.stream,
                status,
            });
            // Bytes after the marker already belong to the next command.
            self.buffer.drain(..end);
        } else if let Some(last) = self.buffer.iter().rposition(|&b| b == b'\n') {
            events.extend(
                self.buffer[..last]
                    .split(|&b| b == b'\n')
                    .map(|line| self.line(line)),
            );
            self.buffer.drain(..=last);
        }

        if self.limit != 0 && self.buffer.len() > self.limit {
            let mut excess = self.buffer.len() - self.limit;
            // A marker still arriving must survive the cut or the command
            // never completes.
            if let Some(start) = pending_marker_start(&self.buffer) {
                excess = excess.min(start);
            }
            self.buffer.drain(..excess);
        }

        events
    }

    fn line(&self, bytes: &[u8]) -> Event {
        Event::Line {
            stream: self.stream,
            text: String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

fn find_exit_status(buffer: &[u8]) -> Option<(usize, usize, String)> {
    let captures = EXIT_STATUS_RE.captures(buffer)?;
    let marker = captures.get(0)?;
    let status = captures.get(1)?;
    Some((
        marker.start(),
        marker.end(),
        String::from_utf8_lossy(status.as_bytes()).into_owned(),
    ))
}

/// Start of a marker that has begun but not yet fully arrived at the end of
/// `buffer`.
fn pending_marker_start(buffer: &[u8]) -> Option<usize> {
    if let Some(start) = buffer
        .windows(MARKER_PREFIX.len())
        .rposition(|window| window == MARKER_PREFIX)
    {
        let token = &buffer[start + MARKER_PREFIX.len()..];
        if !token.iter().any(u8::is_ascii_whitespace) {
            return Some(start);
        }
    }

    (1..MARKER_PREFIX.len())
        .rev()
        .find(|&n| buffer.ends_with(&MARKER_PREFIX[..n]))
        .map(|n| buffer.len() - n)
}

/// Settings shared by both readers of a session.
#[derive(Debug, Clone)]
pub(crate) struct ReaderOptions {
    pub line_limit: usize,
    pub buffer_size: usize,
}

/// Read `source` until it fails or the session shuts down.
///
/// A read failure (including end of stream) is reported once as
/// [`Event::Fatal`], unless `shutdown` was already cancelled, in which case the
/// reader exits quietly. The source is dropped on return.
pub(crate) async fn read_stream<R>(
    mut source: R,
    stream: StreamKind,
    events: mpsc::Sender<Event>,
    shutdown: CancellationToken,
    options: ReaderOptions,
) where
    R: AsyncRead + Unpin,
{
    let mut accumulator = LineAccumulator::new(stream, options.line_limit);
    let mut chunk = vec![0u8; options.buffer_size.max(1)];

    loop {
        let read = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            read = source.read(&mut chunk) => read,
        };

        let count = match read {
            Ok(0) => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed",
            )),
            other => other,
        };

        let count = match count {
            Ok(count) => count,
            Err(e) => {
                if shutdown.is_cancelled() {
                    break;
                }
                debug!(%stream, error = %e, "Shell stream failed");
                let fatal = Event::Fatal {
                    stream,
                    message: e.to_string(),
                };
                forward(&events, &shutdown, fatal).await;
                return;
            }
        };

        trace!(%stream, count, "Read shell output");
        for event in accumulator.push(&chunk[..count]) {
            if !forward(&events, &shutdown, event).await {
                debug!(%stream, "Event queue closed, stopping reader");
                return;
            }
        }
    }

    debug!(%stream, "Shell stream reader stopped");
}

/// Queue an event, giving up if the session shuts down or the queue is gone.
async fn forward(
    events: &mpsc::Sender<Event>,
    shutdown: &CancellationToken,
    event: Event,
) -> bool {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}
