//! Entry point used by the proxy frontend for every inbound connection

use crate::tunnel::TunnelStream;
use crate::{CredentialRouter, RelayError, RelayRegistry, RelaySettings, RouteCredentials};
use bastion_transport::{Destination, TunnelConnector};
use tracing::trace;

/// Stream returned to the frontend for a connector type
pub type RelayStream<C> = TunnelStream<<C as TunnelConnector>::Dialer>;

/// Routes a request to its relay and opens the forwarded stream
pub struct RelayService<C: TunnelConnector> {
    router: CredentialRouter,
    registry: RelayRegistry<C>,
    settings: RelaySettings,
}

impl<C: TunnelConnector> RelayService<C> {
    pub fn new(connector: C, settings: RelaySettings) -> Self {
        Self {
            router: CredentialRouter::new(),
            registry: RelayRegistry::new(connector, settings.retries),
            settings,
        }
    }

    pub fn registry(&self) -> &RelayRegistry<C> {
        &self.registry
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Open a stream to `destination` through the relay named by `credentials`
    pub async fn dial(
        &self,
        credentials: &RouteCredentials,
        destination: &Destination,
    ) -> Result<RelayStream<C>, RelayError> {
        let relay = self.router.resolve(credentials);
        trace!(relay = %relay, destination = %destination, "Incoming proxy request");

        let tunnel = self.registry.get_or_create(&relay).await?;

        trace!(relay = %relay, destination = %destination, "Forwarding connection");
        tunnel
            .forward_to(destination, self.settings.idle_timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RelayId;
    use bastion_transport::mock::MockConnector;
    use std::num::NonZeroU32;
    use std::time::Duration;

    fn service(connector: &MockConnector) -> RelayService<MockConnector> {
        RelayService::new(
            connector.clone(),
            RelaySettings {
                idle_timeout: Duration::from_secs(60),
                retries: NonZeroU32::new(2).unwrap(),
            },
        )
    }

    #[tokio::test]
    async fn test_dial_routes_by_credentials() {
        let connector = MockConnector::new();
        let service = service(&connector);

        service
            .dial(
                &RouteCredentials::new("bastion1", "22"),
                &Destination::new("10.0.0.5", 443),
            )
            .await
            .unwrap();
        service
            .dial(
                &RouteCredentials::new("bastion2", "2222"),
                &Destination::new("10.0.0.6", 443),
            )
            .await
            .unwrap();

        assert_eq!(
            service.registry().relay_ids(),
            vec![
                RelayId::from_host_port("bastion1", "22"),
                RelayId::from_host_port("bastion2", "2222"),
            ]
        );
        assert_eq!(connector.stats().dials, 2);
    }

    #[tokio::test]
    async fn test_setup_failure_surfaces_to_caller() {
        let connector = MockConnector::new();
        let service = service(&connector);
        connector.fail_next_prepares(1);

        let err = service
            .dial(
                &RouteCredentials::new("bastion1", "22"),
                &Destination::new("10.0.0.5", 443),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Setup { .. }));
        assert!(service.registry().is_empty());
    }
}
