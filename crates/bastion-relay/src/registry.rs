//! Relay registry with get-or-create semantics
//!
//! Each relay id maps to a once-initialized cell. The map lock (one shard of
//! the `DashMap`) is held only to find or insert the cell; the potentially
//! slow relay setup runs inside the cell's own initializer, so callers for
//! the same relay wait on each other while callers for different relays do
//! not.

use crate::{RelayError, RelayId, RelayTunnel};
use bastion_transport::TunnelConnector;
use dashmap::DashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error};

type Entry<C> = Arc<OnceCell<Arc<RelayTunnel<<C as TunnelConnector>::Dialer>>>>;

/// Point-in-time view of one registered relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatus {
    pub relay: RelayId,
    pub active: bool,
}

/// Process-wide cache of relay tunnels
///
/// Registered relays are never removed. A relay whose tunnel was closed for
/// idleness keeps its entry and redials on the next request.
pub struct RelayRegistry<C: TunnelConnector> {
    connector: C,
    retries: NonZeroU32,
    relays: DashMap<RelayId, Entry<C>>,
}

impl<C: TunnelConnector> RelayRegistry<C> {
    pub fn new(connector: C, retries: NonZeroU32) -> Self {
        Self {
            connector,
            retries,
            relays: DashMap::new(),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Return the tunnel for `relay`, creating it on first use
    ///
    /// Concurrent callers for the same relay observe exactly one
    /// construction. If construction fails the error is returned and the
    /// empty cell is dropped from the map once no other caller is waiting
    /// on it; the next caller tries again.
    pub async fn get_or_create(
        &self,
        relay: &RelayId,
    ) -> Result<Arc<RelayTunnel<C::Dialer>>, RelayError> {
        if let Some(tunnel) = self.get(relay) {
            return Ok(tunnel);
        }

        let cell = self.relays.entry(relay.clone()).or_default().clone();

        let result = cell
            .get_or_try_init(|| async {
                debug!(relay = %relay, "Registering relay");
                let dialer = self
                    .connector
                    .prepare(relay.as_str())
                    .await
                    .map_err(|source| RelayError::Setup {
                        relay: relay.clone(),
                        source,
                    })?;
                Ok::<_, RelayError>(Arc::new(RelayTunnel::new(
                    relay.clone(),
                    dialer,
                    self.retries,
                )))
            })
            .await
            .cloned();

        if let Err(e) = &result {
            error!(relay = %relay, "Error creating relay: {}", e);
            // Waiters still holding the cell retry on it; the last one out
            // removes it.
            self.relays.remove_if(relay, |_, entry| {
                Arc::ptr_eq(entry, &cell) && !entry.initialized() && Arc::strong_count(entry) == 2
            });
        }
        result
    }

    /// Return the tunnel for `relay` if it has been created
    pub fn get(&self, relay: &RelayId) -> Option<Arc<RelayTunnel<C::Dialer>>> {
        self.relays
            .get(relay)
            .and_then(|entry| entry.value().get().cloned())
    }

    /// Number of registered relays
    pub fn len(&self) -> usize {
        self.relays
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered relay ids, sorted
    pub fn relay_ids(&self) -> Vec<RelayId> {
        let mut ids: Vec<RelayId> = self
            .relays
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Status of every registered relay, sorted by id
    pub fn snapshot(&self) -> Vec<RelayStatus> {
        let mut statuses: Vec<RelayStatus> = self
            .relays
            .iter()
            .filter_map(|entry| {
                entry.value().get().map(|tunnel| RelayStatus {
                    relay: entry.key().clone(),
                    active: tunnel.is_active(),
                })
            })
            .collect();
        statuses.sort_by(|a, b| a.relay.cmp(&b.relay));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_transport::mock::MockConnector;
    use bastion_transport::{Destination, TransportError};
    use std::time::Duration;

    fn registry(connector: &MockConnector) -> RelayRegistry<MockConnector> {
        RelayRegistry::new(connector.clone(), NonZeroU32::new(2).unwrap())
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_instance() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let relay = RelayId::from_host_port("bastion1", "22");

        let first = registry.get_or_create(&relay).await.unwrap();
        let second = registry.get_or_create(&relay).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.stats().prepares, 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_creation_is_lazy() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let relay = RelayId::from_host_port("bastion1", "22");

        assert!(registry.is_empty());
        assert!(registry.get(&relay).is_none());

        let tunnel = registry.get_or_create(&relay).await.unwrap();
        // Registering prepares the relay but does not dial it yet.
        assert!(!tunnel.is_active());
        assert_eq!(connector.stats().dials, 0);
        assert_eq!(connector.prepared_relays(), vec!["bastion1:22".to_string()]);
    }

    #[tokio::test]
    async fn test_setup_failure_leaves_no_entry() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let relay = RelayId::from_host_port("bastion1", "22");
        connector.fail_next_prepares(1);

        let err = registry.get_or_create(&relay).await.unwrap_err();
        match err {
            RelayError::Setup { relay: failed, source } => {
                assert_eq!(failed, relay);
                assert!(matches!(source, TransportError::Setup(_)));
            }
            other => panic!("Expected Setup error, got {:?}", other),
        }
        assert!(registry.is_empty());
        assert!(registry.get(&relay).is_none());
        assert_eq!(registry.relays.len(), 0, "no placeholder left behind");

        registry.get_or_create(&relay).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(connector.stats().prepares, 2);
    }

    #[tokio::test]
    async fn test_failed_relays_do_not_accumulate() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        connector.fail_next_prepares(10);

        for port in 0..10 {
            let relay = RelayId::from_host_port("bastion1", &port.to_string());
            assert!(registry.get_or_create(&relay).await.is_err());
        }

        assert_eq!(registry.relays.len(), 0);
        assert!(registry.relay_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failure_then_success_constructs_once() {
        let connector = MockConnector::new();
        connector.set_prepare_delay(Duration::from_millis(50));
        connector.fail_next_prepares(1);
        let registry = Arc::new(registry(&connector));
        let relay = RelayId::from_host_port("bastion1", "22");

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let relay = relay.clone();
                tokio::spawn(async move { registry.get_or_create(&relay).await })
            })
            .collect();
        let mut tunnels = Vec::new();
        for task in tasks {
            if let Ok(tunnel) = task.await.unwrap() {
                tunnels.push(tunnel);
            }
        }

        // One caller sees the failure, the waiters retry and share one tunnel.
        assert_eq!(tunnels.len(), 3);
        assert!(tunnels.iter().all(|t| Arc::ptr_eq(t, &tunnels[0])));
        assert_eq!(connector.stats().prepares, 2);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_entries_survive_idle_eviction() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let relay = RelayId::from_host_port("bastion1", "22");

        let tunnel = registry.get_or_create(&relay).await.unwrap();
        tunnel
            .forward_to(&Destination::new("10.0.0.5", 443), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!tunnel.is_active());
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.snapshot(),
            vec![RelayStatus {
                relay,
                active: false,
            }]
        );
    }

    #[tokio::test]
    async fn test_relay_ids_sorted() {
        let connector = MockConnector::new();
        let registry = registry(&connector);

        for host in ["charlie", "alpha", "bravo"] {
            registry
                .get_or_create(&RelayId::from_host_port(host, "22"))
                .await
                .unwrap();
        }

        let ids: Vec<String> = registry
            .relay_ids()
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["alpha:22", "bravo:22", "charlie:22"]);
    }
}
