use async_trait::async_trait;
use bastion_relay::{RelayError, RelayService, RelayStream, RouteCredentials};
use bastion_socks::{Credentials, Dialer, Reply, TargetAddr};
use bastion_transport::{Destination, TunnelConnector};
use std::sync::Arc;

/// Bridges SOCKS5 CONNECT requests onto the relay service
pub struct RelayDialer<C: TunnelConnector> {
    service: Arc<RelayService<C>>,
}

impl<C: TunnelConnector> RelayDialer<C> {
    pub fn new(service: Arc<RelayService<C>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<C: TunnelConnector> Dialer for RelayDialer<C> {
    type Stream = RelayStream<C>;
    type Error = RelayError;

    async fn dial(
        &self,
        credentials: &Credentials,
        target: &TargetAddr,
    ) -> Result<RelayStream<C>, RelayError> {
        let credentials = RouteCredentials::new(&credentials.username, &credentials.password);
        let destination = Destination::new(target.host(), target.port());
        self.service.dial(&credentials, &destination).await
    }

    fn failure_reply(&self, error: &RelayError) -> Reply {
        match error {
            RelayError::Forward { .. } => Reply::HostUnreachable,
            RelayError::Setup { .. } | RelayError::TunnelDial { .. } => Reply::GeneralFailure,
        }
    }
}
