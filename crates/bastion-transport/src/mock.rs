//! In-memory transport for testing
//!
//! Every opened stream is an echo stream backed by `tokio::io::duplex`.
//! Failures are scripted by count ("fail the next N dials") so tests can
//! reproduce stale tunnels and unreachable relays deterministically.

use crate::{
    Destination, TransportError, TransportResult, TunnelConnector, TunnelDialer, TunnelHandle,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::DuplexStream;

const ALWAYS: usize = usize::MAX;

/// Counters observed by tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub prepares: usize,
    pub dials: usize,
    pub opens: usize,
    pub closes: usize,
}

#[derive(Debug, Default)]
struct MockState {
    prepares: AtomicUsize,
    dials: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_prepares: AtomicUsize,
    fail_dials: AtomicUsize,
    fail_opens: AtomicUsize,
    /// Handles with an id at or below this report closed
    severed_through: AtomicUsize,
    prepare_delay: Mutex<Duration>,
    dial_delay: Mutex<Duration>,
    prepared_relays: Mutex<Vec<String>>,
}

impl MockState {
    /// Consume one scripted failure, if any is pending
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                ALWAYS => Some(ALWAYS),
                n => Some(n - 1),
            })
            .is_ok()
    }

    fn delay(slot: &Mutex<Duration>) -> Duration {
        slot.lock().map(|d| *d).unwrap_or_default()
    }
}

/// Mock connector shared between a test and the code under test
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MockStats {
        MockStats {
            prepares: self.state.prepares.load(Ordering::SeqCst),
            dials: self.state.dials.load(Ordering::SeqCst),
            opens: self.state.opens.load(Ordering::SeqCst),
            closes: self.state.closes.load(Ordering::SeqCst),
        }
    }

    /// Relay addresses passed to `prepare`, in call order
    pub fn prepared_relays(&self) -> Vec<String> {
        self.state
            .prepared_relays
            .lock()
            .map(|relays| relays.clone())
            .unwrap_or_default()
    }

    pub fn fail_next_prepares(&self, count: usize) {
        self.state.fail_prepares.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_dials(&self, count: usize) {
        self.state.fail_dials.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_opens(&self, count: usize) {
        self.state.fail_opens.store(count, Ordering::SeqCst);
    }

    pub fn fail_all_opens(&self) {
        self.state.fail_opens.store(ALWAYS, Ordering::SeqCst);
    }

    /// Mark every handle dialed so far as closed by the remote side
    ///
    /// Does not count as a `close`.
    pub fn sever_tunnels(&self) {
        let dialed = self.state.dials.load(Ordering::SeqCst);
        self.state.severed_through.fetch_max(dialed, Ordering::SeqCst);
    }

    pub fn set_prepare_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.state.prepare_delay.lock() {
            *slot = delay;
        }
    }

    pub fn set_dial_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.state.dial_delay.lock() {
            *slot = delay;
        }
    }
}

#[async_trait]
impl TunnelConnector for MockConnector {
    type Dialer = MockDialer;

    async fn prepare(&self, relay_addr: &str) -> TransportResult<Self::Dialer> {
        let delay = MockState::delay(&self.state.prepare_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.state.prepares.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut relays) = self.state.prepared_relays.lock() {
            relays.push(relay_addr.to_string());
        }

        if MockState::take_failure(&self.state.fail_prepares) {
            return Err(TransportError::Setup("mock agent unavailable".to_string()));
        }

        Ok(MockDialer {
            relay: relay_addr.to_string(),
            state: self.state.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MockDialer {
    relay: String,
    state: Arc<MockState>,
}

#[async_trait]
impl TunnelDialer for MockDialer {
    type Handle = MockHandle;

    async fn dial(&self) -> TransportResult<Self::Handle> {
        let delay = MockState::delay(&self.state.dial_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let id = self.state.dials.fetch_add(1, Ordering::SeqCst) + 1;
        if MockState::take_failure(&self.state.fail_dials) {
            return Err(TransportError::ConnectionError(format!(
                "mock relay {} unreachable",
                self.relay
            )));
        }

        Ok(MockHandle {
            id,
            relay: self.relay.clone(),
            closed: AtomicBool::new(false),
            state: self.state.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MockHandle {
    id: usize,
    relay: String,
    closed: AtomicBool,
    state: Arc<MockState>,
}

impl MockHandle {
    /// Sequence number of the dial that produced this handle (1-based)
    pub fn id(&self) -> usize {
        self.id
    }
}

#[async_trait]
impl TunnelHandle for MockHandle {
    type Stream = DuplexStream;

    async fn open_stream(&self, destination: &Destination) -> TransportResult<Self::Stream> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        self.state.opens.fetch_add(1, Ordering::SeqCst);
        if MockState::take_failure(&self.state.fail_opens) {
            return Err(TransportError::StreamOpen {
                destination: destination.to_string(),
                reason: "mock connection refused".to_string(),
            });
        }

        let (client, server) = tokio::io::duplex(16 * 1024);
        tokio::spawn(async move {
            let (mut read, mut write) = tokio::io::split(server);
            let _ = tokio::io::copy(&mut read, &mut write).await;
        });

        Ok(client)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            || self.id <= self.state.severed_through.load(Ordering::SeqCst)
    }

    fn connection_id(&self) -> String {
        format!("mock-{}-{}", self.relay, self.id)
    }
}
