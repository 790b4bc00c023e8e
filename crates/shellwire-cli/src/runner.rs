//! Feeds a list of commands through one shell session.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use shellwire_core::{Error, Shell, StreamKind, Transport};

/// How commands are run and their output mirrored.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Prefix lines with `OUT: ` / `ERR: `.
    pub prefix: bool,
    /// Stop after the first command with a non-zero status.
    pub fail_fast: bool,
    /// Per-command time limit. The session is closed when it expires.
    pub timeout: Option<Duration>,
}

/// Run each entry of `commands` as one command, so an entry may span several
/// lines.
///
/// Blank entries are skipped. Returns the status of the last command run, or
/// 0 if there was none.
pub async fn run_commands<T, O, E>(
    shell: &Shell<T>,
    commands: &[String],
    options: &RunOptions,
    out: &mut O,
    err: &mut E,
) -> Result<i32>
where
    T: Transport,
    O: Write + Send,
    E: Write + Send,
{
    let mut last_status = 0;

    for command in commands {
        if command.trim().is_empty() {
            continue;
        }

        last_status = run_one(shell, command, options, out, err).await?;
        if stops_here(options, command, last_status) {
            break;
        }
    }

    Ok(last_status)
}

/// Run every command line read from `commands` on `shell`.
///
/// Blank lines and lines starting with `#` are skipped. Returns the status of
/// the last command run, or 0 if there was none.
pub async fn run_script<T, R, O, E>(
    shell: &Shell<T>,
    commands: R,
    options: &RunOptions,
    out: &mut O,
    err: &mut E,
) -> Result<i32>
where
    T: Transport,
    R: AsyncBufRead + Unpin,
    O: Write + Send,
    E: Write + Send,
{
    let mut lines = commands.lines();
    let mut last_status = 0;

    while let Some(line) = lines.next_line().await.context("Failed to read command")? {
        let command = line.trim();
        if command.is_empty() || command.starts_with('#') {
            continue;
        }

        last_status = run_one(shell, command, options, out, err).await?;
        if stops_here(options, command, last_status) {
            break;
        }
    }

    Ok(last_status)
}

fn stops_here(options: &RunOptions, command: &str, status: i32) -> bool {
    let stop = options.fail_fast && status != 0;
    if stop {
        debug!(command, status, "Stopping after failed command");
    }
    stop
}

async fn run_one<T, O, E>(
    shell: &Shell<T>,
    command: &str,
    options: &RunOptions,
    out: &mut O,
    err: &mut E,
) -> Result<i32>
where
    T: Transport,
    O: Write + Send,
    E: Write + Send,
{
    let prefix = options.prefix;
    let run = shell.run(command, |stream, line| {
        match stream {
            StreamKind::Stdout if prefix => writeln!(out, "OUT: {line}")?,
            StreamKind::Stdout => writeln!(out, "{line}")?,
            StreamKind::Stderr if prefix => writeln!(err, "ERR: {line}")?,
            StreamKind::Stderr => writeln!(err, "{line}")?,
        }
        Ok(())
    });

    let result = match options.timeout {
        Some(limit) => {
            if let Ok(result) = tokio::time::timeout(limit, run).await {
                result
            } else {
                warn!(command, ?limit, "Command timed out, closing session");
                if let Err(e) = shell.close().await {
                    warn!(error = %e, "Failed to close session after timeout");
                }
                bail!("Command {command:?} timed out after {limit:?}");
            }
        }
        None => run.await,
    };

    match result {
        Ok(status) => Ok(status),
        Err(Error::Handler { status, source }) => Err(anyhow::anyhow!(source).context(format!(
            "Failed to write output of {command:?} (exit status {status})"
        ))),
        Err(e) => Err(e).with_context(|| format!("Command {command:?} failed")),
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use shellwire_core::ChildTransport;
    use shellwire_core::config::{LocalConfig, SessionConfig};

    fn shell() -> Shell<ChildTransport> {
        let local = LocalConfig {
            terminate_timeout_secs: 1,
            ..LocalConfig::default()
        };
        Shell::local(&SessionConfig::default(), &local).unwrap()
    }

    async fn script(
        shell: &Shell<ChildTransport>,
        text: &str,
        options: &RunOptions,
    ) -> (i32, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = run_script(shell, text.as_bytes(), options, &mut out, &mut err)
            .await
            .unwrap();
        (
            status,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[tokio::test]
    async fn mirrors_output_with_prefix() {
        let shell = shell();
        let options = RunOptions {
            prefix: true,
            ..RunOptions::default()
        };
        let (status, out, err) =
            script(&shell, "echo hello\n\n# comment\necho oops 1>&2\nfalse\n", &options).await;

        assert_eq!(status, 1);
        assert_eq!(out, "OUT: hello\n");
        assert_eq!(err, "ERR: oops\n");
        shell.close().await.unwrap();
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_failure() {
        let shell = shell();
        let options = RunOptions {
            fail_fast: true,
            ..RunOptions::default()
        };
        let (status, out, _) = script(&shell, "sh -c 'exit 3'\necho after\n", &options).await;

        assert_eq!(status, 3);
        assert!(out.is_empty());
        shell.close().await.unwrap();
    }

    #[tokio::test]
    async fn multi_line_command_runs_as_one() {
        let shell = shell();
        let commands = vec![
            "if true; then\n  echo inside\nfi".to_string(),
            String::new(),
            "echo after".to_string(),
        ];
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = tokio::time::timeout(
            Duration::from_secs(5),
            run_commands(&shell, &commands, &RunOptions::default(), &mut out, &mut err),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(status, 0);
        assert_eq!(String::from_utf8(out).unwrap(), "inside\nafter\n");
        shell.close().await.unwrap();
    }

    #[tokio::test]
    async fn fail_fast_applies_to_command_list() {
        let shell = shell();
        let commands = vec!["sh -c 'exit 4'".to_string(), "echo after".to_string()];
        let options = RunOptions {
            fail_fast: true,
            ..RunOptions::default()
        };
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = run_commands(&shell, &commands, &options, &mut out, &mut err)
            .await
            .unwrap();

        assert_eq!(status, 4);
        assert!(out.is_empty());
        shell.close().await.unwrap();
    }

    #[tokio::test]
    async fn empty_script_reports_success() {
        let shell = shell();
        let (status, out, err) = script(&shell, "\n# nothing\n", &RunOptions::default()).await;

        assert_eq!(status, 0);
        assert!(out.is_empty());
        assert!(err.is_empty());
        shell.close().await.unwrap();
    }

    #[tokio::test]
    async fn timeout_closes_session() {
        let shell = shell();
        let options = RunOptions {
            timeout: Some(Duration::from_millis(200)),
            ..RunOptions::default()
        };
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = run_script(&shell, &b"sleep 30\n"[..], &options, &mut out, &mut err).await;

        assert!(result.unwrap_err().to_string().contains("timed out"));
        assert_eq!(shell.state(), shellwire_core::SessionState::Closed);
    }
}
