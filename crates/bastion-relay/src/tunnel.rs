//! Per-relay tunnel: lazy dial, redial-and-retry, idle eviction
//!
//! State per relay:
//!
//! ```text
//!            forward_to                dial ok
//! NoHandle ─────────────▶ Dialing ─────────────▶ Active ◀──┐
//!    ▲                       │                     │        │ open ok
//!    │ idle deadline         │ dial error          │ open   │
//!    │ passed                ▼                     ▼ error  │
//!    └──────────────── (error returned)          Failed ────┘ redial
//! ```
//!
//! Only one handle is ever installed. Installing a new handle closes the
//! previous one, and each handle gets its own idle watcher that can only
//! evict the handle it was spawned for (matched by generation).

use crate::idle::IdleDeadline;
use crate::{RelayError, RelayId};
use bastion_transport::{Destination, TransportError, TunnelDialer, TunnelHandle};
use parking_lot::RwLock;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

/// Stream type produced by a dialer's handles
pub type TunnelStream<D> = <<D as TunnelDialer>::Handle as TunnelHandle>::Stream;

struct Installed<H> {
    generation: u64,
    handle: Arc<H>,
    watcher: AbortHandle,
}

/// State shared with the idle watchers
struct TunnelState<H> {
    relay: RelayId,
    slot: RwLock<Option<Installed<H>>>,
    idle: IdleDeadline,
}

enum IdleCheck {
    Evicted,
    Superseded,
    Reset,
}

impl<H: TunnelHandle> TunnelState<H> {
    /// The installed handle, unless it is the one the caller saw fail or the
    /// transport already reports it closed
    fn current_unless(&self, stale: Option<u64>) -> Option<(u64, Arc<H>)> {
        let slot = self.slot.read();
        slot.as_ref()
            .filter(|installed| Some(installed.generation) != stale)
            .filter(|installed| !installed.handle.is_closed())
            .map(|installed| (installed.generation, installed.handle.clone()))
    }

    /// Install `handle` as `generation`, spawning its watcher under the
    /// slot lock so the watcher never observes the previous generation
    fn install(
        &self,
        generation: u64,
        handle: Arc<H>,
        spawn_watcher: impl FnOnce() -> AbortHandle,
    ) -> Option<Installed<H>> {
        let mut slot = self.slot.write();
        let watcher = spawn_watcher();
        slot.replace(Installed {
            generation,
            handle,
            watcher,
        })
    }

    fn has_live_handle(&self) -> bool {
        self.slot
            .read()
            .as_ref()
            .is_some_and(|installed| !installed.handle.is_closed())
    }

    async fn evict_if_idle(&self, generation: u64) -> IdleCheck {
        let evicted = {
            let mut slot = self.slot.write();
            match slot.as_ref() {
                Some(installed) if installed.generation == generation => {}
                _ => return IdleCheck::Superseded,
            }
            if !self.idle.is_expired() {
                return IdleCheck::Reset;
            }
            slot.take()
        };

        if let Some(installed) = evicted {
            debug!(
                relay = %self.relay,
                connection_id = %installed.handle.connection_id(),
                "Connection idle, closing tunnel to relay"
            );
            installed.handle.close().await;
        }
        IdleCheck::Evicted
    }
}

/// Sleeps until the idle deadline and evicts the handle of `generation`
/// if no forward request pushed the deadline back in the meantime
async fn watch_idle<H: TunnelHandle>(state: Weak<TunnelState<H>>, generation: u64) {
    loop {
        let deadline = match state.upgrade() {
            Some(state) => state.idle.deadline(),
            None => return,
        };

        tokio::time::sleep_until(deadline).await;

        let Some(state) = state.upgrade() else {
            return;
        };
        match state.evict_if_idle(generation).await {
            IdleCheck::Evicted | IdleCheck::Superseded => return,
            IdleCheck::Reset => continue,
        }
    }
}

/// Lazily established, shared tunnel to one relay
pub struct RelayTunnel<D: TunnelDialer> {
    dialer: D,
    retries: NonZeroU32,
    /// Serializes dials so concurrent requests share one new handle
    dial_lock: Mutex<()>,
    generation: AtomicU64,
    state: Arc<TunnelState<D::Handle>>,
}

impl<D: TunnelDialer> RelayTunnel<D> {
    pub fn new(relay: RelayId, dialer: D, retries: NonZeroU32) -> Self {
        Self {
            dialer,
            retries,
            dial_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            state: Arc::new(TunnelState {
                relay,
                slot: RwLock::new(None),
                idle: IdleDeadline::new(),
            }),
        }
    }

    pub fn relay(&self) -> &RelayId {
        &self.state.relay
    }

    pub fn retries(&self) -> NonZeroU32 {
        self.retries
    }

    /// Whether a tunnel handle is installed and the transport still has it open
    pub fn is_active(&self) -> bool {
        self.state.has_live_handle()
    }

    /// Identifier of the installed handle, if any
    pub fn connection_id(&self) -> Option<String> {
        self.state
            .slot
            .read()
            .as_ref()
            .map(|installed| installed.handle.connection_id())
    }

    /// Open a stream to `destination` through this relay
    ///
    /// Resets the idle deadline, then makes up to `retries` attempts. A failed
    /// destination dial redials the tunnel before the next attempt; a failed
    /// tunnel dial ends the call immediately. Every successful tunnel dial
    /// re-arms the deadline, so a slow dial cannot leave the new handle
    /// already expired.
    pub async fn forward_to(
        &self,
        destination: &Destination,
        idle_timeout: Duration,
    ) -> Result<TunnelStream<D>, RelayError> {
        self.state.idle.reset(idle_timeout);

        let retries = self.retries.get();
        let mut stale = None;
        let mut last_error = None;

        for attempt in 1..=retries {
            let (generation, handle) = self.acquire(stale, idle_timeout).await?;

            trace!(
                relay = %self.state.relay,
                destination = %destination,
                connection_id = %handle.connection_id(),
                attempt,
                "Dialling tunnelled connection to destination"
            );

            match handle.open_stream(destination).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    warn!(
                        relay = %self.state.relay,
                        destination = %destination,
                        remaining = retries - attempt,
                        "Error opening tunnelled connection: {}",
                        e
                    );
                    stale = Some(generation);
                    last_error = Some(e);
                }
            }
        }

        Err(RelayError::Forward {
            relay: self.state.relay.clone(),
            destination: destination.clone(),
            attempts: retries,
            source: last_error.unwrap_or(TransportError::Closed),
        })
    }

    /// Current handle, or a freshly dialed one when there is none or the
    /// current one is the `stale` generation
    async fn acquire(
        &self,
        stale: Option<u64>,
        idle_timeout: Duration,
    ) -> Result<(u64, Arc<D::Handle>), RelayError> {
        if let Some(current) = self.state.current_unless(stale) {
            return Ok(current);
        }

        let _dialing = self.dial_lock.lock().await;

        // Another request may have redialed while we waited.
        if let Some(current) = self.state.current_unless(stale) {
            return Ok(current);
        }

        debug!(relay = %self.state.relay, "Dialling tunnel to relay");
        let handle = self
            .dialer
            .dial()
            .await
            .map(Arc::new)
            .map_err(|source| RelayError::TunnelDial {
                relay: self.state.relay.clone(),
                source,
            })?;

        self.state.idle.reset(idle_timeout);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let state = Arc::downgrade(&self.state);
        let previous = self.state.install(generation, handle.clone(), || {
            tokio::spawn(watch_idle(state, generation)).abort_handle()
        });

        if let Some(previous) = previous {
            previous.watcher.abort();
            debug!(
                relay = %self.state.relay,
                connection_id = %previous.handle.connection_id(),
                "Closing superseded tunnel"
            );
            previous.handle.close().await;
        }

        Ok((generation, handle))
    }
}

impl<D: TunnelDialer> std::fmt::Debug for RelayTunnel<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayTunnel")
            .field("relay", &self.state.relay)
            .field("retries", &self.retries)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
