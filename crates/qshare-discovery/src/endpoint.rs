//! Resolved peer endpoints.

use std::fmt;
use std::net::IpAddr;

/// Connectable address of a resolved QShare peer.
///
/// Endpoints are immutable values. A new resolution produces a new endpoint
/// that replaces the previous one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from a host string and port
    ///
    /// The host is used verbatim in URLs, so IPv6 literals must already be
    /// bracketed. Use [`Endpoint::from_ip`] to get that for free.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Create an endpoint from an IP address and port
    #[must_use]
    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        match ip {
            IpAddr::V4(v4) => Self::new(v4.to_string(), port),
            IpAddr::V6(v6) => Self::new(format!("[{v6}]"), port),
        }
    }

    /// Host part, as used in URLs
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL of the peer's HTTP API: `http://{host}:{port}`
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Absolute URL for a path on this endpoint
    ///
    /// `path` must start with `/`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}:{}", self.host, self.port)
    }
}

/// Parse `host:port` into an endpoint
///
/// Accepts bracketed IPv6 (`[::1]:8080`); a bare IPv6 host and userinfo
/// (`user@host`) are rejected. Used for manually configured peers.
impl std::str::FromStr for Endpoint {
    type Err = crate::DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| crate::DiscoveryError::InvalidEndpoint(s.to_string()))?;

        let port: u16 = port
            .parse()
            .map_err(|_| crate::DiscoveryError::InvalidEndpoint(s.to_string()))?;

        let bracketed = host.len() > 2 && host.starts_with('[') && host.ends_with(']');
        let inner = if bracketed { &host[1..host.len() - 1] } else { host };
        if host.is_empty()
            || port == 0
            || inner.contains(['/', '@', '[', ']'])
            || (!bracketed && host.contains(':'))
        {
            return Err(crate::DiscoveryError::InvalidEndpoint(s.to_string()));
        }

        Ok(Self::new(host, port))
    }
}
