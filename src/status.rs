//! Periodic relay status logging

use bastion_relay::{RelayRegistry, RelayService};
use bastion_transport::TunnelConnector;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub relays: Vec<String>,
    pub active: usize,
}

impl StatusSummary {
    pub fn collect<C: TunnelConnector>(registry: &RelayRegistry<C>) -> Self {
        let snapshot = registry.snapshot();
        Self {
            active: snapshot.iter().filter(|status| status.active).count(),
            relays: snapshot
                .into_iter()
                .map(|status| status.relay.to_string())
                .collect(),
        }
    }
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} relay(s), {} active: [{}]",
            self.relays.len(),
            self.active,
            self.relays.join(", ")
        )
    }
}

/// Log a [`StatusSummary`] every `interval` until the task is aborted
pub fn spawn_status_reporter<C: TunnelConnector>(
    service: Arc<RelayService<C>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let summary = StatusSummary::collect(service.registry());
            info!(
                relays = summary.relays.len(),
                active = summary.active,
                "Relay status: {}",
                summary
            );
        }
    })
}
