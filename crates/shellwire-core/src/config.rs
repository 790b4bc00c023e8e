//! Configuration resolution for shellwire.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/shellwire/settings.json)
//! 3. Project config (.shellwire/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete shellwire configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl Config {
    /// Whether a remote address is configured, from any layer.
    pub fn is_remote(&self) -> bool {
        !self.remote.address.trim().is_empty()
    }
}

/// Settings of the session protocol itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum bytes kept for a single unfinished line; 0 means unlimited.
    pub line_limit: usize,
    /// Capacity of the event queue shared by the stream readers.
    pub queue_capacity: usize,
    /// Size of each read from stdout/stderr.
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            line_limit: 0,
            queue_capacity: 4096,
            read_buffer_size: 1024,
        }
    }
}

/// Local shell process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocalConfig {
    /// Shell binary to spawn.
    pub shell: PathBuf,
    /// Initial working directory; inherits ours when unset.
    pub working_directory: Option<PathBuf>,
    /// Seconds to wait for the shell to exit after `exit` before killing it.
    pub terminate_timeout_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            working_directory: None,
            terminate_timeout_secs: 5,
        }
    }
}

/// Remote shell configuration. The connection itself is made by `ssh`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Target as `[user@]host[:port]`.
    pub address: String,
    /// `ssh` client binary.
    pub ssh_program: PathBuf,
    /// Private key passed with `-i`.
    pub identity_file: Option<PathBuf>,
    /// Extra `-o` options for the ssh client.
    pub ssh_options: Vec<String>,
    /// Shell started on the remote host.
    pub shell: String,
    pub terminate_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            ssh_program: PathBuf::from("ssh"),
            identity_file: None,
            ssh_options: vec!["BatchMode=yes".to_string()],
            shell: "/bin/sh".to_string(),
            terminate_timeout_secs: 5,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            merge_json(&mut merged, load_config_file(&global_path)?);
        }
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".shellwire").join("settings.json");
        if project_path.exists() {
            merge_json(&mut merged, load_config_file(&project_path)?);
        }
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("shellwire").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Overlay `overlay` onto `base`, recursing into objects so a file only has to
/// name the keys it changes.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `SHELLWIRE_*` overrides read through `lookup`.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("SHELLWIRE_LINE_LIMIT").and_then(|v| v.parse().ok()) {
        config.session.line_limit = n;
    }
    if let Some(n) = lookup("SHELLWIRE_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
        config.session.queue_capacity = n;
    }
    if let Some(shell) = lookup("SHELLWIRE_SHELL") {
        config.local.shell = PathBuf::from(shell);
    }
    if let Some(program) = lookup("SHELLWIRE_SSH_PROGRAM") {
        config.remote.ssh_program = PathBuf::from(program);
    }
    if let Some(n) = lookup("SHELLWIRE_TERMINATE_TIMEOUT").and_then(|v| v.parse().ok()) {
        config.local.terminate_timeout_secs = n;
        config.remote.terminate_timeout_secs = n;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_unlimited() {
        let config = Config::default();
        assert_eq!(config.session.line_limit, 0);
        assert_eq!(config.session.queue_capacity, 4096);
        assert_eq!(config.local.shell, PathBuf::from("/bin/sh"));
        assert_eq!(config.remote.ssh_options, vec!["BatchMode=yes"]);
        assert!(!config.is_remote());
    }

    #[test]
    fn partial_overlay_keeps_other_defaults() {
        let mut merged = serde_json::to_value(Config::default()).unwrap();
        merge_json(
            &mut merged,
            serde_json::json!({ "session": { "line_limit": 8 } }),
        );
        let config: Config = serde_json::from_value(merged).unwrap();
        assert_eq!(config.session.line_limit, 8);
        assert_eq!(config.session.queue_capacity, 4096);
        assert_eq!(config.local, LocalConfig::default());
    }

    #[test]
    fn project_file_is_loaded() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_dir = dir.path().join(".shellwire");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("settings.json"),
            r#"{ "remote": { "address": "deploy@build01:2222" } }"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.remote.address, "deploy@build01:2222");
        assert_eq!(config.remote.shell, "/bin/sh");
        assert!(config.is_remote());
    }

    #[test]
    fn malformed_project_file_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_dir = dir.path().join(".shellwire");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("settings.json"), "{ not json").unwrap();

        let err = load_config(Some(dir.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SHELLWIRE_LINE_LIMIT", "64"),
            ("SHELLWIRE_SHELL", "/bin/bash"),
            ("SHELLWIRE_TERMINATE_TIMEOUT", "1"),
            ("SHELLWIRE_QUEUE_CAPACITY", "not a number"),
        ]);
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.session.line_limit, 64);
        assert_eq!(config.session.queue_capacity, 4096);
        assert_eq!(config.local.shell, PathBuf::from("/bin/bash"));
        assert_eq!(config.local.terminate_timeout_secs, 1);
        assert_eq!(config.remote.terminate_timeout_secs, 1);
    }
}
