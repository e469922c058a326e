//! SSH transport for relay tunnels
//!
//! Implements the `bastion-transport` traits on top of `russh`:
//!
//! - [`SshConnector`] holds the process-wide authentication configuration and
//!   opens one SSH agent connection per relay when the relay is first seen.
//! - [`SshDialer`] dials and authenticates a fresh SSH session to its relay.
//! - [`SshTunnel`] wraps a live session; every forwarded stream is a
//!   `direct-tcpip` channel, so the relay dials the final destination itself.

mod config;
mod connector;
mod error;

pub use config::{HostKeyPolicy, SshAuthConfig, SSH_AUTH_SOCK};
pub use connector::{HostKeyCheck, SshConnector, SshDialer, SshTunnel};
pub use error::SshError;
