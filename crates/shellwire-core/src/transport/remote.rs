//! Remote shell transport over the system `ssh` client.
//!
//! Dialing, host key checks and authentication are all left to `ssh`; this
//! module only builds the command line and hands the resulting pipes to the
//! session.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio::process::Command;

use super::ChildTransport;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};

const DEFAULT_USER: &str = "root";
const DEFAULT_PORT: u16 = 22;

/// Parsed `[user@]host[:port]` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl FromStr for SshTarget {
    type Err = Error;

    fn from_str(address: &str) -> Result<Self> {
        let address = address.trim();
        let (user, rest) = match address.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (user, rest),
            Some(_) => return Err(Error::InvalidAddress(address.to_string())),
            None => (DEFAULT_USER, address),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            // [v6::addr]:port
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| Error::InvalidAddress(address.to_string()))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(Error::InvalidAddress(address.to_string())),
            }
        } else {
            match rest.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(Error::InvalidAddress(address.to_string()));
        }
        let port = match port {
            Some(port) => port
                .parse()
                .map_err(|_| Error::InvalidAddress(address.to_string()))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}@[{}]:{}", self.user, self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.user, self.host, self.port)
        }
    }
}

/// Arguments passed to the ssh client for `config`.
pub(crate) fn ssh_args(target: &SshTarget, config: &RemoteConfig) -> Vec<String> {
    let mut args = vec![
        "-T".to_string(),
        "-p".to_string(),
        target.port.to_string(),
    ];
    if let Some(identity) = &config.identity_file {
        args.push("-i".to_string());
        args.push(identity.display().to_string());
    }
    for option in &config.ssh_options {
        args.push("-o".to_string());
        args.push(option.clone());
    }
    args.push(format!("{}@{}", target.user, target.host));
    args.push(config.shell.clone());
    args
}

impl ChildTransport {
    /// Start a shell on `config.address` through the ssh client.
    pub fn remote(config: &RemoteConfig) -> Result<Self> {
        let target: SshTarget = config.address.parse()?;
        let mut command = Command::new(&config.ssh_program);
        command.args(ssh_args(&target, config));

        Self::spawn(
            command,
            target.to_string(),
            Duration::from_secs(config.terminate_timeout_secs),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn host_only_uses_defaults() {
        let target: SshTarget = "example.com".parse().unwrap();
        assert_eq!(target.user, "root");
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 22);
    }

    #[test]
    fn user_host_and_port() {
        let target: SshTarget = "deploy@10.0.0.5:2222".parse().unwrap();
        assert_eq!(target.user, "deploy");
        assert_eq!(target.host, "10.0.0.5");
        assert_eq!(target.port, 2222);
        assert_eq!(target.to_string(), "deploy@10.0.0.5:2222");
    }

    #[test]
    fn bracketed_ipv6() {
        let target: SshTarget = "admin@[::1]:2200".parse().unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 2200);
        assert_eq!(target.to_string(), "admin@[::1]:2200");
    }

    #[test]
    fn rejects_bad_addresses() {
        for address in ["", "@host", "host:notaport", "user@:22", "[::1"] {
            assert!(
                address.parse::<SshTarget>().is_err(),
                "{address:?} should be rejected"
            );
        }
    }

    #[test]
    fn ssh_args_include_identity_and_options() {
        let config = RemoteConfig {
            address: "ci@runner:2022".to_string(),
            identity_file: Some("/keys/id_ed25519".into()),
            ..RemoteConfig::default()
        };
        let target: SshTarget = config.address.parse().unwrap();
        assert_eq!(
            ssh_args(&target, &config),
            vec![
                "-T",
                "-p",
                "2022",
                "-i",
                "/keys/id_ed25519",
                "-o",
                "BatchMode=yes",
                "ci@runner",
                "/bin/sh",
            ]
        );
    }

    #[tokio::test]
    async fn missing_ssh_program_fails_to_spawn() {
        let config = RemoteConfig {
            address: "host".to_string(),
            ssh_program: "/nonexistent/shellwire-ssh".into(),
            ..RemoteConfig::default()
        };
        let err = ChildTransport::remote(&config).unwrap_err();
        assert!(matches!(err, Error::Spawn(_)));
    }
}
