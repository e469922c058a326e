use std::num::NonZeroU32;
use std::time::Duration;

/// Process-wide relay settings, read-only after startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// How long a tunnel may sit without forward requests before it is closed
    pub idle_timeout: Duration,
    /// Attempts per forward request; each failed attempt redials the tunnel
    pub retries: NonZeroU32,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(4 * 60 * 60),
            retries: NonZeroU32::MIN.saturating_add(1),
        }
    }
}
