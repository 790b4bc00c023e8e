//! shellwire CLI
//!
//! Opens one shell session, locally or over ssh, and runs commands in it so
//! that working directory and environment carry over from one to the next.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use shellwire_cli::runner::{self, RunOptions};
use shellwire_core::config::{self, Config};
use shellwire_core::{ChildTransport, Shell};

type CommandSource = Box<dyn AsyncBufRead + Unpin + Send>;

#[derive(Parser, Debug)]
#[command(name = "shellwire")]
#[command(version, about = "Run commands in a persistent local or remote shell", long_about = None)]
struct Cli {
    /// Command to run; repeat to run several in the same shell
    #[arg(short = 'c', long = "command")]
    commands: Vec<String>,

    /// File with one command per line (default: read commands from stdin)
    #[arg(long, conflicts_with = "commands")]
    script: Option<PathBuf>,

    /// Remote target as [user@]host[:port]; runs locally when unset
    #[arg(long, env = "SHELLWIRE_REMOTE")]
    remote: Option<String>,

    /// Private key for the ssh client
    #[arg(long)]
    identity: Option<PathBuf>,

    /// Extra ssh option, passed as `-o OPTION`
    #[arg(long = "ssh-option")]
    ssh_options: Vec<String>,

    /// Shell to start (local path, or remote command when a remote is set)
    #[arg(long)]
    shell: Option<String>,

    /// Working directory of the local shell
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Maximum bytes kept for a single output line (0 = unlimited)
    #[arg(long)]
    line_limit: Option<usize>,

    /// Prefix output lines with OUT:/ERR:
    #[arg(long)]
    prefix: bool,

    /// Stop at the first command with a non-zero exit status
    #[arg(long)]
    fail_fast: bool,

    /// Per-command timeout in seconds; the session is closed on expiry
    #[arg(long)]
    timeout: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "warn", env = "SHELLWIRE_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SHELLWIRE_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    /// Layer command-line flags over the resolved configuration.
    ///
    /// The remote address may also come from a settings file, so `--shell`
    /// follows the address resolved so far, not the `--remote` flag alone.
    fn apply(&self, config: &mut Config) {
        if let Some(limit) = self.line_limit {
            config.session.line_limit = limit;
        }
        if let Some(address) = &self.remote {
            config.remote.address.clone_from(address);
        }
        if let Some(identity) = &self.identity {
            config.remote.identity_file = Some(identity.clone());
        }
        config.remote.ssh_options.extend(self.ssh_options.iter().cloned());
        if let Some(shell) = &self.shell {
            if config.is_remote() {
                config.remote.shell.clone_from(shell);
            } else {
                config.local.shell = PathBuf::from(shell);
            }
        }
        if let Some(cwd) = &self.cwd {
            config.local.working_directory = Some(cwd.clone());
        }
    }

    /// Line-oriented command source, or `None` when commands were given
    /// with `-c`.
    async fn command_source(&self) -> anyhow::Result<Option<CommandSource>> {
        if !self.commands.is_empty() {
            return Ok(None);
        }
        if let Some(path) = &self.script {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open script {}", path.display()))?;
            return Ok(Some(Box::new(BufReader::new(file))));
        }
        Ok(Some(Box::new(BufReader::new(tokio::io::stdin()))))
    }
}

/// Install the global subscriber. Logs go to stderr; stdout carries the
/// output of the commands.
fn init_tracing(level: &str, log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("shellwire_core={level},shellwire_cli={level}"))
    });
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry.with(layer.json()).init();
    } else {
        registry.with(layer).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_json);

    let project_dir = std::env::current_dir().ok();
    let mut config =
        config::load_config(project_dir.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);

    let source = cli.command_source().await?;

    let shell: Shell<ChildTransport> = if config.is_remote() {
        info!(address = %config.remote.address, "Opening remote shell");
        Shell::remote(&config.session, &config.remote)?
    } else {
        info!(shell = %config.local.shell.display(), "Opening local shell");
        Shell::local(&config.session, &config.local)?
    };

    let options = RunOptions {
        prefix: cli.prefix,
        fail_fast: cli.fail_fast,
        timeout: cli.timeout.map(Duration::from_secs),
    };

    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let result = match source {
        Some(source) => {
            runner::run_script(&shell, source, &options, &mut stdout, &mut stderr).await
        }
        None => {
            runner::run_commands(&shell, &cli.commands, &options, &mut stdout, &mut stderr)
                .await
        }
    };

    if let Err(e) = shell.close().await {
        warn!(error = %e, "Failed to close shell session");
    }

    let status = result?;
    info!(status, "Done");
    std::process::exit(status);
}
