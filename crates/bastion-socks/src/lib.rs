//! SOCKS5 frontend
//!
//! This crate implements the client-facing side of the proxy: the SOCKS5
//! handshake (RFC 1928) with username/password sub-negotiation (RFC 1929),
//! CONNECT requests, and byte relaying once a stream is established.
//! Opening the outbound stream is delegated to a [`Dialer`].
//!
//! Any username/password is accepted. The credentials are handed to the
//! dialer untouched, which may use them as routing data.

mod error;
mod protocol;
mod server;

pub use error::SocksError;
pub use protocol::{
    negotiate_auth, read_request, write_reply, Credentials, Reply, TargetAddr, SOCKS_VERSION,
};
pub use server::{Dialer, SocksServer};
