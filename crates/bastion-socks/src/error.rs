use thiserror::Error;

/// SOCKS5 session errors
#[derive(Debug, Error)]
pub enum SocksError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unsupported SOCKS version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("Unsupported username/password auth version: {0:#04x}")]
    UnsupportedAuthVersion(u8),

    #[error("No acceptable authentication method offered")]
    NoAcceptableMethod,

    #[error("Unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("Unsupported address type: {0:#04x}")]
    UnsupportedAddressType(u8),

    #[error("Dial to {target} failed: {reason}")]
    DialFailed { target: String, reason: String },

    #[error("Failed to bind to {address}: {reason}")]
    BindError { address: String, reason: String },
}
