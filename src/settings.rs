//! Startup settings: YAML config file merged with CLI flags
//!
//! Precedence is CLI flag (or its env var), then config file, then default.

use crate::cli::Cli;
use anyhow::{Context, Result};
use bastion_relay::RelaySettings;
use bastion_ssh::HostKeyPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
const DEFAULT_LISTEN_PORT: u16 = 5101;
const DEFAULT_IDLE_CLOSE: Duration = Duration::from_secs(4 * 60 * 60);
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration file format
///
/// Durations use humantime syntax (`4h`, `30m`, `90s`).
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_close: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_interval: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host_keys: Vec<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Fully resolved proxy settings, read-only after startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// `host:port` the SOCKS5 listener binds to
    pub listen_addr: String,
    pub user: String,
    pub key_file: Option<PathBuf>,
    pub relay: RelaySettings,
    /// None disables the status reporter
    pub status_interval: Option<Duration>,
    /// None waits forever
    pub connect_timeout: Option<Duration>,
    pub host_keys: HostKeyPolicy,
}

impl ProxySettings {
    /// Merge CLI args with the config file named by `--config`, if any
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                ConfigFile::load(path)?
            }
            None => ConfigFile::default(),
        };
        Self::merge(cli, file, login_user())
    }

    /// `fallback_user` is used when neither CLI nor file name a user
    pub fn merge(cli: &Cli, file: ConfigFile, fallback_user: Option<String>) -> Result<Self> {
        let listen_host = cli
            .listen_host
            .clone()
            .or(file.listen_host)
            .unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string());
        let listen_port = cli
            .listen_port
            .or(file.listen_port)
            .unwrap_or(DEFAULT_LISTEN_PORT);

        let user = cli
            .user
            .clone()
            .or(file.user)
            .or(fallback_user)
            .filter(|user| !user.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("SSH user is required (use --user, config file, or $USER)")
            })?;

        let idle_timeout = pick_duration(cli.idle_close, file.idle_close, "idle_close")?
            .unwrap_or(DEFAULT_IDLE_CLOSE);
        if idle_timeout.is_zero() {
            anyhow::bail!("Idle close duration must be greater than zero");
        }

        let max_retries = cli
            .max_retries
            .or(file.max_retries)
            .unwrap_or(DEFAULT_MAX_RETRIES);
        let retries = NonZeroU32::new(max_retries)
            .ok_or_else(|| anyhow::anyhow!("Max retries must be at least 1"))?;

        let status_interval =
            pick_duration(cli.status_interval, file.status_interval, "status_interval")?
                .filter(|interval| !interval.is_zero());

        let connect_timeout =
            match pick_duration(cli.connect_timeout, file.connect_timeout, "connect_timeout")? {
                Some(timeout) if timeout.is_zero() => None,
                Some(timeout) => Some(timeout),
                None => Some(DEFAULT_CONNECT_TIMEOUT),
            };

        let host_keys = if !cli.host_keys.is_empty() {
            cli.host_keys.clone()
        } else {
            file.host_keys
        };
        let host_keys = if host_keys.is_empty() {
            HostKeyPolicy::AcceptAny
        } else {
            HostKeyPolicy::Pinned(host_keys)
        };

        Ok(Self {
            listen_addr: join_host_port(&listen_host, listen_port),
            user,
            key_file: cli.key_file.clone().or(file.key_file),
            relay: RelaySettings {
                idle_timeout,
                retries,
            },
            status_interval,
            connect_timeout,
            host_keys,
        })
    }
}

fn pick_duration(
    flag: Option<humantime::Duration>,
    file_value: Option<String>,
    field: &str,
) -> Result<Option<Duration>> {
    if let Some(flag) = flag {
        return Ok(Some(flag.into()));
    }
    file_value
        .map(|value| {
            humantime::parse_duration(&value)
                .with_context(|| format!("Invalid duration for {}: {}", field, value))
        })
        .transpose()
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn login_user() -> Option<String> {
    ["USER", "LOGNAME"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|value| !value.is_empty()))
}
