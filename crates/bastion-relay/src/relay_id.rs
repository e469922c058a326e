use std::fmt;

/// Registry key identifying one relay endpoint, canonically `host:port`
///
/// IPv6 literal hosts are bracketed (`[fd00::1]:22`) so the key is also a
/// valid dial address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayId(String);

impl RelayId {
    pub fn from_host_port(host: &str, port: &str) -> Self {
        if host.contains(':') {
            Self(format!("[{}]:{}", host, port))
        } else {
            Self(format!("{}:{}", host, port))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
