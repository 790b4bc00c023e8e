//! Local `/bin/sh` transport.

use std::time::Duration;

use tokio::process::Command;

use super::ChildTransport;
use crate::config::LocalConfig;
use crate::error::Result;

impl ChildTransport {
    /// Start the configured shell as a local child process.
    pub fn local(config: &LocalConfig) -> Result<Self> {
        let mut command = Command::new(&config.shell);
        if let Some(dir) = &config.working_directory {
            command.current_dir(dir);
        }

        Self::spawn(
            command,
            config.shell.display().to_string(),
            Duration::from_secs(config.terminate_timeout_secs),
        )
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::transport::Transport;

    #[tokio::test]
    async fn missing_shell_fails_to_spawn() {
        let config = LocalConfig {
            shell: "/nonexistent/shellwire-sh".into(),
            ..LocalConfig::default()
        };
        let err = ChildTransport::local(&config).unwrap_err();
        assert!(matches!(err, Error::Spawn(_)));
    }

    #[tokio::test]
    async fn pipes_can_only_be_taken_once() {
        let mut transport = ChildTransport::local(&LocalConfig::default()).unwrap();
        assert!(transport.id().is_some());
        let pipes = transport.take_pipes().unwrap();
        assert!(matches!(
            transport.take_pipes(),
            Err(Error::MissingPipe("stdin"))
        ));

        // Closing stdin makes the shell exit on its own.
        drop(pipes);
        transport.terminate().await.unwrap();
    }
}
