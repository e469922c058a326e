//! Transport abstraction layer for relay tunnels
//!
//! This crate provides the traits that the relay lifecycle manager uses to
//! talk to a tunnel implementation without coupling to a specific protocol.
//! The production implementation lives in `bastion-ssh`; tests use the
//! in-memory transport from [`mock`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              bastion-relay (registry, tunnels)           │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Uses traits
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │            bastion-transport (this crate)                │
//! │  - TunnelConnector   - TunnelDialer   - TunnelHandle     │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Implemented by
//!                           ↓
//! ┌────────────────────────────┬────────────────────────────┐
//! │ bastion-ssh (russh)        │ mock (tests)               │
//! └────────────────────────────┴────────────────────────────┘
//! ```
//!
//! The three traits mirror the three lifetimes involved in forwarding:
//! a connector lives for the whole process, a dialer lives as long as the
//! relay entry it was prepared for, and a handle lives from a successful
//! dial until it is closed.

mod destination;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use destination::{Destination, DestinationParseError};

use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Failed to open stream to {destination}: {reason}")]
    StreamOpen {
        destination: String,
        reason: String,
    },

    #[error("Tunnel closed")]
    Closed,

    #[error("Timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A byte stream to a final destination, opened through a tunnel
pub trait ForwardStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ForwardStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased forwarded stream, for callers that do not care which
/// transport produced it
pub type BoxedStream = Box<dyn ForwardStream>;

/// Process-scoped factory for per-relay dialers
///
/// `prepare` runs once per relay, the first time it is seen. It is the place
/// for setup that can fail before any network traffic reaches the relay,
/// such as reaching a signing agent.
#[async_trait]
pub trait TunnelConnector: Send + Sync + Debug + 'static {
    /// The dialer type produced for each relay
    type Dialer: TunnelDialer;

    /// Prepare a dialer for the relay at `relay_addr` (`host:port`)
    async fn prepare(&self, relay_addr: &str) -> TransportResult<Self::Dialer>;
}

/// Dials fresh tunnels to a single relay
#[async_trait]
pub trait TunnelDialer: Send + Sync + Debug + 'static {
    /// The live tunnel type created by this dialer
    type Handle: TunnelHandle;

    /// Establish and authenticate a new tunnel
    async fn dial(&self) -> TransportResult<Self::Handle>;
}

/// A live tunnel able to carry many concurrent forwarded streams
#[async_trait]
pub trait TunnelHandle: Send + Sync + Debug + 'static {
    /// The stream type opened through this tunnel
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Ask the relay to open a stream to `destination`
    async fn open_stream(&self, destination: &Destination) -> TransportResult<Self::Stream>;

    /// Close the tunnel. Streams already opened through it are torn down.
    async fn close(&self);

    /// Check if the tunnel is closed
    fn is_closed(&self) -> bool;

    /// Get a unique stable identifier for this tunnel
    ///
    /// Used for logging and correlation only.
    fn connection_id(&self) -> String;
}
