use crate::RelayId;
use bastion_transport::{Destination, TransportError};
use thiserror::Error;

/// Relay lifecycle errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// Per-relay setup failed (signing agent unreachable, bad key material).
    /// No registry entry is created.
    #[error("Failed to register relay {relay}: {source}")]
    Setup {
        relay: RelayId,
        #[source]
        source: TransportError,
    },

    /// The tunnel itself could not be established. Not retried.
    #[error("Failed to dial relay {relay}: {source}")]
    TunnelDial {
        relay: RelayId,
        #[source]
        source: TransportError,
    },

    /// Every attempt to reach the destination through the relay failed.
    /// Carries the last attempt's error.
    #[error("Failed to reach {destination} through relay {relay} after {attempts} attempt(s): {source}")]
    Forward {
        relay: RelayId,
        destination: Destination,
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

impl RelayError {
    pub fn relay(&self) -> &RelayId {
        match self {
            RelayError::Setup { relay, .. }
            | RelayError::TunnelDial { relay, .. }
            | RelayError::Forward { relay, .. } => relay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let relay = RelayId::from_host_port("bastion1", "22");

        let err = RelayError::Setup {
            relay: relay.clone(),
            source: TransportError::Setup("agent unavailable".to_string()),
        };
        assert!(err.to_string().contains("register relay bastion1:22"));

        let err = RelayError::Forward {
            relay: relay.clone(),
            destination: Destination::new("10.0.0.5", 443),
            attempts: 2,
            source: TransportError::Closed,
        };
        assert_eq!(
            err.to_string(),
            "Failed to reach 10.0.0.5:443 through relay bastion1:22 after 2 attempt(s): Tunnel closed"
        );
        assert_eq!(err.relay(), &relay);
    }
}
