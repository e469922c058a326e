//! russh-backed implementation of the tunnel traits

use crate::{HostKeyPolicy, SshAuthConfig, SshError};
use async_trait::async_trait;
use bastion_transport::{
    Destination, TransportError, TransportResult, TunnelConnector, TunnelDialer, TunnelHandle,
};
use russh::client;
use russh::keys::agent::client::AgentClient;
use russh::keys::ssh_key::{HashAlg, PrivateKey, PublicKey};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{ChannelStream, Disconnect};
use std::fmt;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Originator reported to the relay for `direct-tcpip` channels
const ORIGINATOR_ADDRESS: &str = "127.0.0.1";

/// Creates one [`SshDialer`] per relay, sharing the authentication config
#[derive(Debug, Clone)]
pub struct SshConnector {
    auth: Arc<SshAuthConfig>,
    client_config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new(auth: SshAuthConfig) -> Self {
        Self {
            auth: Arc::new(auth),
            client_config: Arc::new(client::Config::default()),
        }
    }

    pub fn auth(&self) -> &SshAuthConfig {
        &self.auth
    }
}

#[async_trait]
impl TunnelConnector for SshConnector {
    type Dialer = SshDialer;

    async fn prepare(&self, relay_addr: &str) -> TransportResult<Self::Dialer> {
        let socket = self
            .auth
            .agent_socket
            .as_ref()
            .ok_or(SshError::AgentNotConfigured)?;

        let agent = AgentClient::connect_uds(socket)
            .await
            .map_err(|e| SshError::AgentConnect {
                path: socket.clone(),
                reason: e.to_string(),
            })?;

        debug!(relay = %relay_addr, agent = %socket.display(), "Connected to SSH agent");

        let private_key = self.auth.load_private_key()?.map(Arc::new);

        Ok(SshDialer {
            relay: relay_addr.to_string(),
            auth: self.auth.clone(),
            client_config: self.client_config.clone(),
            agent: Mutex::new(agent),
            private_key,
        })
    }
}

/// Dials authenticated SSH sessions to a single relay
pub struct SshDialer {
    relay: String,
    auth: Arc<SshAuthConfig>,
    client_config: Arc<client::Config>,
    agent: Mutex<AgentClient<UnixStream>>,
    private_key: Option<Arc<PrivateKey>>,
}

impl fmt::Debug for SshDialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshDialer")
            .field("relay", &self.relay)
            .field("user", &self.auth.user)
            .finish_non_exhaustive()
    }
}

impl SshDialer {
    async fn connect(&self) -> Result<client::Handle<HostKeyCheck>, SshError> {
        let handler = HostKeyCheck {
            relay: self.relay.clone(),
            policy: self.auth.host_keys.clone(),
        };
        let connect = client::connect(self.client_config.clone(), self.relay.as_str(), handler);

        match self.auth.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| SshError::ConnectTimeout {
                    relay: self.relay.clone(),
                    timeout,
                })?
                .map_err(SshError::from),
            None => connect.await.map_err(SshError::from),
        }
    }

    /// Try agent identities first, then the configured key file
    async fn authenticate(&self, session: &mut client::Handle<HostKeyCheck>) -> Result<(), SshError> {
        let user = self.auth.user.as_str();
        let rsa_hash = session.best_supported_rsa_hash().await?.flatten();

        {
            let mut agent = self.agent.lock().await;
            let identities = agent
                .request_identities()
                .await
                .map_err(|e| SshError::Agent(e.to_string()))?;

            trace!(relay = %self.relay, identities = identities.len(), "Trying agent identities");

            for key in identities {
                let hash_alg = hash_for(&key, rsa_hash);
                let result = session
                    .authenticate_publickey_with(user, key, hash_alg, &mut *agent)
                    .await
                    .map_err(|e| SshError::Agent(e.to_string()))?;
                if result.success() {
                    return Ok(());
                }
            }
        }

        if let Some(key) = &self.private_key {
            trace!(relay = %self.relay, "Trying private key file");
            let result = session
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key.clone(), rsa_hash))
                .await?;
            if result.success() {
                return Ok(());
            }
        }

        Err(SshError::AuthenticationRejected {
            user: user.to_string(),
            relay: self.relay.clone(),
        })
    }
}

fn hash_for(key: &PublicKey, rsa_hash: Option<HashAlg>) -> Option<HashAlg> {
    if key.algorithm().is_rsa() {
        rsa_hash
    } else {
        None
    }
}

#[async_trait]
impl TunnelDialer for SshDialer {
    type Handle = SshTunnel;

    async fn dial(&self) -> TransportResult<Self::Handle> {
        let mut session = self.connect().await?;
        self.authenticate(&mut session).await?;

        let tunnel = SshTunnel {
            id: uuid::Uuid::new_v4().to_string(),
            relay: self.relay.clone(),
            session,
        };
        debug!(relay = %self.relay, connection_id = %tunnel.id, "SSH session established");
        Ok(tunnel)
    }
}

/// A live SSH session to a relay
pub struct SshTunnel {
    id: String,
    relay: String,
    session: client::Handle<HostKeyCheck>,
}

impl fmt::Debug for SshTunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTunnel")
            .field("id", &self.id)
            .field("relay", &self.relay)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TunnelHandle for SshTunnel {
    type Stream = ChannelStream<client::Msg>;

    async fn open_stream(&self, destination: &Destination) -> TransportResult<Self::Stream> {
        let channel = self
            .session
            .channel_open_direct_tcpip(
                destination.host(),
                u32::from(destination.port()),
                ORIGINATOR_ADDRESS,
                0,
            )
            .await
            .map_err(|e| TransportError::StreamOpen {
                destination: destination.to_string(),
                reason: e.to_string(),
            })?;

        Ok(channel.into_stream())
    }

    async fn close(&self) {
        if let Err(e) = self
            .session
            .disconnect(Disconnect::ByApplication, "idle", "en")
            .await
        {
            debug!(relay = %self.relay, connection_id = %self.id, "Disconnect failed: {}", e);
        }
    }

    fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    fn connection_id(&self) -> String {
        self.id.clone()
    }
}

/// russh client handler enforcing the host key policy
#[derive(Debug, Clone)]
pub struct HostKeyCheck {
    relay: String,
    policy: HostKeyPolicy,
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        let allowed = self.policy.allows(&fingerprint);

        if allowed {
            trace!(relay = %self.relay, %fingerprint, "Accepted relay host key");
        } else {
            warn!(relay = %self.relay, %fingerprint, "Rejected untrusted relay host key");
        }

        Ok(allowed)
    }
}
