//! Credential-based relay routing
//!
//! The proxy username names the relay host and the password names the relay
//! port. This is addressing, not authentication: the proxy accepts any
//! credentials, and a bad value only shows up later as a dial failure.

use crate::RelayId;
use tracing::trace;

/// Username/password pair presented during the proxy handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteCredentials {
    pub username: String,
    pub password: String,
}

impl RouteCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Derives the relay a request should be routed through
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialRouter;

impl CredentialRouter {
    pub fn new() -> Self {
        Self
    }

    /// username → relay host, password → relay port
    pub fn resolve(&self, credentials: &RouteCredentials) -> RelayId {
        let relay = RelayId::from_host_port(&credentials.username, &credentials.password);
        trace!(relay = %relay, "Resolved relay from credentials");
        relay
    }
}
