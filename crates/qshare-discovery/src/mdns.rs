//! mDNS / DNS-SD backend built on `mdns-sd`
//!
//! The daemon browses and resolves in one step: every browse delivers
//! `ServiceFound` followed by `ServiceResolved` once the SRV/A records
//! arrive. The backend forwards `ServiceFound` as an advertisement and keeps
//! resolutions in a cache that [`MdnsBackend::resolve`] waits on.

use crate::backend::{
    Advertisement, BrowseEvent, BrowseReceiver, DiscoveryBackend, ResolvedService,
    normalize_service_type,
};
use crate::error::{DiscoveryError, FailureCode};
use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

/// Default time to wait for an advertisement to resolve
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// mDNS backend configuration
#[derive(Debug, Clone)]
pub struct MdnsConfig {
    /// How long `resolve` waits for the daemon's resolution
    pub resolve_timeout: Duration,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }
}

type ResolvedCache = Arc<Mutex<HashMap<String, ResolvedService>>>;

/// Discovery backend using the `mdns-sd` daemon
pub struct MdnsBackend {
    daemon: ServiceDaemon,
    config: MdnsConfig,
    resolved: ResolvedCache,
    resolved_notify: Arc<Notify>,
}

impl MdnsBackend {
    /// Start an mDNS daemon
    ///
    /// # Errors
    ///
    /// Returns error if the daemon cannot bind its multicast sockets.
    pub fn new(config: MdnsConfig) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()?;
        Ok(Self {
            daemon,
            config,
            resolved: Arc::new(Mutex::new(HashMap::new())),
            resolved_notify: Arc::new(Notify::new()),
        })
    }

    /// Shut the daemon down
    ///
    /// Errors are ignored; this runs during process shutdown.
    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            tracing::debug!("Ignoring mDNS daemon shutdown error: {}", e);
        }
    }
}

fn cached(resolved: &ResolvedCache, instance_name: &str) -> Option<ResolvedService> {
    resolved
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(instance_name)
        .cloned()
}

/// Wait until `instance_name` shows up in the resolution cache
async fn wait_for_resolution(
    resolved: &ResolvedCache,
    notify: &Notify,
    instance_name: &str,
    timeout: Duration,
) -> Result<ResolvedService, FailureCode> {
    let wait = async {
        loop {
            // Register before checking so a resolution between the two is not missed
            let notified = notify.notified();
            if let Some(service) = cached(resolved, instance_name) {
                return service;
            }
            notified.await;
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| FailureCode::TIMEOUT)
}

/// Fully qualified DNS-SD type for the daemon (`_qshare._tcp.local.`)
fn wire_service_type(service_type: &str) -> String {
    format!("{}.local.", normalize_service_type(service_type))
}

fn resolved_from_info(info: &ServiceInfo) -> ResolvedService {
    let mut addresses: Vec<_> = info.get_addresses().iter().copied().collect();
    addresses.sort();

    let properties: BTreeMap<String, String> = info
        .get_properties()
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()))
        .collect();

    ResolvedService {
        instance_name: info.get_fullname().to_string(),
        hostname: info.get_hostname().to_string(),
        addresses,
        port: info.get_port(),
        properties,
    }
}

/// Blocking loop moving daemon events into the async subscription
///
/// Ends when the daemon stops the search, the events run out, or the
/// subscriber goes away.
fn forward_events(
    events: impl IntoIterator<Item = ServiceEvent>,
    tx: mpsc::UnboundedSender<BrowseEvent>,
    resolved: ResolvedCache,
    notify: Arc<Notify>,
) {
    for event in events {
        let forwarded = match event {
            ServiceEvent::ServiceFound(service_type, fullname) => {
                tx.send(BrowseEvent::Found(Advertisement::new(fullname, service_type)))
            }
            ServiceEvent::ServiceResolved(info) => {
                let service = resolved_from_info(&info);
                tracing::trace!(
                    "mDNS resolved {} -> {:?}:{}",
                    service.instance_name,
                    service.addresses,
                    service.port
                );
                resolved
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(service.instance_name.clone(), service);
                notify.notify_waiters();
                Ok(())
            }
            ServiceEvent::ServiceRemoved(service_type, fullname) => {
                resolved
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&fullname);
                tx.send(BrowseEvent::Lost(Advertisement::new(fullname, service_type)))
            }
            ServiceEvent::SearchStopped(service_type) => {
                tracing::debug!("mDNS search stopped for {}", service_type);
                break;
            }
            _ => Ok(()),
        };

        if forwarded.is_err() {
            break;
        }
    }
}

#[async_trait]
impl DiscoveryBackend for MdnsBackend {
    async fn browse(&self, service_type: &str) -> Result<BrowseReceiver, FailureCode> {
        let wire_type = wire_service_type(service_type);
        let receiver = self.daemon.browse(&wire_type).map_err(|e| {
            tracing::warn!("mDNS browse for {} failed: {}", wire_type, e);
            FailureCode::INTERNAL_ERROR
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let resolved = Arc::clone(&self.resolved);
        let notify = Arc::clone(&self.resolved_notify);
        let events = std::iter::from_fn(move || receiver.recv().ok());
        tokio::task::spawn_blocking(move || forward_events(events, tx, resolved, notify));

        Ok(rx)
    }

    async fn stop_browse(&self, service_type: &str) -> Result<(), FailureCode> {
        self.daemon
            .stop_browse(&wire_service_type(service_type))
            .map_err(|e| {
                tracing::debug!("mDNS stop_browse failed: {}", e);
                FailureCode::INTERNAL_ERROR
            })
    }

    async fn resolve(&self, advertisement: &Advertisement) -> Result<ResolvedService, FailureCode> {
        wait_for_resolution(
            &self.resolved,
            &self.resolved_notify,
            &advertisement.instance_name,
            self.config.resolve_timeout,
        )
        .await
    }
}

impl Drop for MdnsBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
