use bastion_transport::TransportError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from SSH setup, dialing and authentication
#[derive(Debug, Error)]
pub enum SshError {
    #[error("SSH agent unavailable: SSH_AUTH_SOCK is not set")]
    AgentNotConfigured,

    #[error("Failed to open SSH agent socket {path}: {reason}")]
    AgentConnect { path: PathBuf, reason: String },

    #[error("SSH agent error: {0}")]
    Agent(String),

    #[error("Open ssh key {path} failed: {reason}")]
    KeyFile { path: PathBuf, reason: String },

    #[error("Connection to {relay} timed out after {timeout:?}")]
    ConnectTimeout { relay: String, timeout: Duration },

    #[error("No authentication method accepted for user {user} on {relay}")]
    AuthenticationRejected { user: String, relay: String },

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
}

impl From<SshError> for TransportError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::AgentNotConfigured
            | SshError::AgentConnect { .. }
            | SshError::KeyFile { .. } => TransportError::Setup(err.to_string()),
            SshError::Agent(_) | SshError::AuthenticationRejected { .. } => {
                TransportError::AuthenticationFailed(err.to_string())
            }
            SshError::ConnectTimeout { .. } => TransportError::Timeout,
            SshError::Ssh(e) => TransportError::ConnectionError(e.to_string()),
        }
    }
}
