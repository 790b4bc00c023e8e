//! Transport backed by a child process.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{Pipes, Transport};
use crate::error::{Error, Result};

/// A shell running as a child process, either `/bin/sh` directly or an `ssh`
/// client that runs the shell on a remote host.
#[derive(Debug)]
pub struct ChildTransport {
    child: Child,
    label: String,
    /// How long to wait for the shell to exit on its own before killing it.
    terminate_timeout: Duration,
}

impl ChildTransport {
    /// Spawn `command` with all three standard streams piped.
    pub fn spawn(
        mut command: Command,
        label: impl Into<String>,
        terminate_timeout: Duration,
    ) -> Result<Self> {
        let label = label.into();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| Error::Spawn(format!("{label}: {e}")))?;
        info!(label = %label, pid = ?child.id(), "Spawned shell process");

        Ok(Self {
            child,
            label,
            terminate_timeout,
        })
    }

    /// OS process id, if the process has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .map_err(|e| Error::Terminate(format!("{}: {e}", self.label)))
    }
}

impl Transport for ChildTransport {
    type Stdin = ChildStdin;
    type Stdout = ChildStdout;
    type Stderr = ChildStderr;

    fn take_pipes(&mut self) -> Result<Pipes<ChildStdin, ChildStdout, ChildStderr>> {
        let stdin = self.child.stdin.take().ok_or(Error::MissingPipe("stdin"))?;
        let stdout = self.child.stdout.take().ok_or(Error::MissingPipe("stdout"))?;
        let stderr = self.child.stderr.take().ok_or(Error::MissingPipe("stderr"))?;
        Ok(Pipes {
            stdin,
            stdout,
            stderr,
        })
    }

    async fn terminate(&mut self) -> Result<()> {
        debug!(label = %self.label, "Terminating shell process");

        match tokio::time::timeout(self.terminate_timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(label = %self.label, ?status, "Shell exited gracefully");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(label = %self.label, error = %e, "Error waiting for shell");
                self.kill().await
            }
            Err(_) => {
                warn!(label = %self.label, "Timeout waiting for shell to exit, killing");
                self.kill().await
            }
        }
    }
}

