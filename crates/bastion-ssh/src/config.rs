//! Process-wide SSH authentication configuration
//!
//! Built once at startup and shared read-only by every relay.

use crate::SshError;
use russh::keys::ssh_key::PrivateKey;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Environment variable holding the SSH agent socket path
pub const SSH_AUTH_SOCK: &str = "SSH_AUTH_SOCK";

/// How relay host keys are verified
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept any host key (no verification)
    #[default]
    AcceptAny,
    /// Accept only host keys whose SHA256 fingerprint is listed
    /// (`SHA256:...`, as printed by `ssh-keygen -lf`)
    Pinned(Vec<String>),
}

impl HostKeyPolicy {
    pub fn allows(&self, fingerprint: &str) -> bool {
        match self {
            HostKeyPolicy::AcceptAny => true,
            HostKeyPolicy::Pinned(allowed) => allowed.iter().any(|f| f == fingerprint),
        }
    }
}

/// Authentication settings used for every relay dial
#[derive(Debug, Clone)]
pub struct SshAuthConfig {
    /// Username presented to every relay
    pub user: String,
    /// Path of the SSH agent socket
    pub agent_socket: Option<PathBuf>,
    /// Private key file tried after the agent identities, read when each
    /// relay is registered
    pub key_file: Option<PathBuf>,
    /// Host key verification policy
    pub host_keys: HostKeyPolicy,
    /// TCP connect + handshake timeout (None = wait forever)
    pub connect_timeout: Option<Duration>,
}

impl SshAuthConfig {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            agent_socket: None,
            key_file: None,
            host_keys: HostKeyPolicy::default(),
            connect_timeout: None,
        }
    }

    /// Take the agent socket from `SSH_AUTH_SOCK`
    pub fn from_env(user: impl Into<String>) -> Self {
        let agent_socket = std::env::var_os(SSH_AUTH_SOCK)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self::new(user).with_agent_socket_opt(agent_socket)
    }

    pub fn with_agent_socket(self, path: impl Into<PathBuf>) -> Self {
        self.with_agent_socket_opt(Some(path.into()))
    }

    fn with_agent_socket_opt(mut self, path: Option<PathBuf>) -> Self {
        self.agent_socket = path;
        self
    }

    pub fn with_private_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_file = Some(path.into());
        self
    }

    /// Read and parse the configured key file, if any
    ///
    /// Only unencrypted keys are supported.
    pub fn load_private_key(&self) -> Result<Option<PrivateKey>, SshError> {
        let Some(path) = &self.key_file else {
            return Ok(None);
        };

        let key = russh::keys::load_secret_key(path, None).map_err(|e| SshError::KeyFile {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        debug!(key_file = %path.display(), algorithm = %key.algorithm(), "Loaded private key");
        Ok(Some(key))
    }

    pub fn with_host_keys(mut self, policy: HostKeyPolicy) -> Self {
        self.host_keys = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
