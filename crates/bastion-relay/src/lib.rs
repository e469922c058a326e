//! Relay connection lifecycle manager
//!
//! Maps proxy credentials to a relay, keeps at most one live tunnel per relay,
//! redials tunnels that stop carrying streams, and closes tunnels that sit
//! idle.
//!
//! ```text
//! credentials ──▶ CredentialRouter ──▶ RelayId
//!                                        │
//!                                        ▼
//!                              RelayRegistry::get_or_create
//!                                        │
//!                                        ▼
//!                 RelayTunnel::forward_to(destination, idle_timeout)
//!                                        │
//!                                        ▼
//!                                 forwarded stream
//! ```
//!
//! The registry never forgets a relay: one entry is kept for every relay
//! ever contacted, even after its tunnel has been closed for idleness.
//! Memory therefore grows with the number of distinct relays seen by the
//! process.

mod config;
mod error;
mod idle;
mod registry;
mod relay_id;
mod router;
mod service;
mod tunnel;

pub use config::RelaySettings;
pub use error::RelayError;
pub use registry::{RelayRegistry, RelayStatus};
pub use relay_id::RelayId;
pub use router::{CredentialRouter, RouteCredentials};
pub use service::{RelayService, RelayStream};
pub use tunnel::RelayTunnel;
