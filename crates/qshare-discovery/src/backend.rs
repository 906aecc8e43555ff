//! Discovery backend abstraction
//!
//! The resolver talks to the network only through [`DiscoveryBackend`]. The
//! production implementation is [`MdnsBackend`](crate::mdns::MdnsBackend);
//! tests drive the resolver with scripted backends.

use crate::endpoint::Endpoint;
use crate::error::FailureCode;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tokio::sync::mpsc;

/// Service type advertised by QShare peers
pub const SERVICE_TYPE: &str = "_qshare._tcp";

/// Strip the `.local.` domain and trailing dot from a DNS-SD service type
///
/// `_qshare._tcp.local.`, `_qshare._tcp.` and `_qshare._tcp` all normalise to
/// `_qshare._tcp`.
#[must_use]
pub fn normalize_service_type(service_type: &str) -> &str {
    let trimmed = service_type.trim_end_matches('.');
    trimmed.strip_suffix(".local").unwrap_or(trimmed)
}

/// Compare two service types after normalisation
#[must_use]
pub fn service_type_matches(a: &str, b: &str) -> bool {
    normalize_service_type(a).eq_ignore_ascii_case(normalize_service_type(b))
}

/// Announcement of a service instance, before resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Instance name (DNS-SD full name, e.g. `QShare._qshare._tcp.local.`)
    pub instance_name: String,
    /// Service type the instance was announced under
    pub service_type: String,
}

impl Advertisement {
    /// Create an advertisement
    #[must_use]
    pub fn new(instance_name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            service_type: service_type.into(),
        }
    }
}

/// Result of resolving an advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    /// Instance name the resolution belongs to
    pub instance_name: String,
    /// Target host name (e.g. `QShare.local.`)
    pub hostname: String,
    /// Addresses published for the host
    pub addresses: Vec<IpAddr>,
    /// Service port
    pub port: u16,
    /// TXT record properties
    pub properties: BTreeMap<String, String>,
}

impl ResolvedService {
    /// Derive the connectable endpoint
    ///
    /// Prefers the first IPv4 address, then the first IPv6 address, then the
    /// host name without its trailing dot. Returns `None` when none of these
    /// is usable or the port is zero.
    #[must_use]
    pub fn endpoint(&self) -> Option<Endpoint> {
        if self.port == 0 {
            return None;
        }

        let ip = self
            .addresses
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| self.addresses.first());

        if let Some(ip) = ip {
            return Some(Endpoint::from_ip(*ip, self.port));
        }

        let host = self.hostname.trim_end_matches('.');
        if host.is_empty() {
            None
        } else {
            Some(Endpoint::new(host, self.port))
        }
    }

    /// TXT property lookup
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Raw events from a browse subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    /// An instance was announced
    Found(Advertisement),
    /// An instance went away
    Lost(Advertisement),
}

/// Receiving side of a browse subscription
///
/// The subscription ends when the sender is dropped.
pub type BrowseReceiver = mpsc::UnboundedReceiver<BrowseEvent>;

/// Platform discovery facility
#[async_trait]
pub trait DiscoveryBackend: Send + Sync + 'static {
    /// Begin browsing for `service_type`
    ///
    /// # Errors
    ///
    /// Returns a failure code if the browse cannot be started.
    async fn browse(&self, service_type: &str) -> Result<BrowseReceiver, FailureCode>;

    /// Stop browsing for `service_type`
    ///
    /// # Errors
    ///
    /// Returns a failure code if the backend reports a teardown error.
    async fn stop_browse(&self, service_type: &str) -> Result<(), FailureCode>;

    /// Resolve a single advertisement to its host and port
    ///
    /// # Errors
    ///
    /// Returns a failure code if resolution fails or times out.
    async fn resolve(&self, advertisement: &Advertisement) -> Result<ResolvedService, FailureCode>;
}
