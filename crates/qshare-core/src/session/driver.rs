//! Discovery driver
//!
//! The single task that consumes resolver events and feeds the session.
//! Outcomes are published as [`SessionEvent`]s for the presentation layer.

use super::coordinator::SessionCoordinator;
use crate::error::Error;
use crate::types::FileListing;
use qshare_discovery::{DiscoveryEvent, DiscoveryEvents, Endpoint};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What the presentation layer is told
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A peer was resolved and adopted
    Connected(Endpoint),
    /// The current listing was replaced
    ListingUpdated(FileListing),
    /// The adopted peer went away and the session was reset
    Disconnected,
    /// Discovery or the initial listing failed
    Failed(Error),
}

/// Driver configuration
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// Reset the session when the adopted peer's advertisement is withdrawn
    pub forget_lost_peer: bool,
}

/// Connects resolver output to a [`SessionCoordinator`]
pub struct SessionDriver {
    session: Arc<SessionCoordinator>,
    config: DriverConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Instance name of the adopted peer
    adopted: Option<String>,
}

impl SessionDriver {
    /// Create a driver and the receiver for its session events
    #[must_use]
    pub fn new(
        session: Arc<SessionCoordinator>,
        config: DriverConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Self {
            session,
            config,
            events: tx,
            adopted: None,
        };
        (driver, rx)
    }

    /// Consume discovery events until the resolver goes away
    pub async fn run(mut self, mut discovery: DiscoveryEvents) {
        while let Some(event) = discovery.next().await {
            self.handle(event).await;
        }
        tracing::debug!("Discovery stream ended, driver exiting");
    }

    /// Apply one discovery event
    pub async fn handle(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Resolved { service, endpoint } => {
                self.adopted = Some(service.instance_name);
                self.publish(SessionEvent::Connected(endpoint.clone()));

                match self.session.on_endpoint_resolved(endpoint).await {
                    Ok(listing) => self.publish(SessionEvent::ListingUpdated(listing)),
                    Err(e) => {
                        tracing::warn!("Initial listing failed: {}", e);
                        self.publish(SessionEvent::Failed(e));
                    }
                }
            }
            DiscoveryEvent::ServiceLost(advertisement) => {
                let is_adopted = self.adopted.as_deref() == Some(advertisement.instance_name.as_str());
                if is_adopted && self.config.forget_lost_peer {
                    self.adopted = None;
                    self.session.disconnect().await;
                    self.publish(SessionEvent::Disconnected);
                } else {
                    tracing::debug!(
                        "Peer {} withdrawn, keeping session",
                        advertisement.instance_name
                    );
                }
            }
            DiscoveryEvent::DiscoveryStartFailed(code) => {
                self.publish(SessionEvent::Failed(Error::DiscoveryStartFailed(code)));
            }
            DiscoveryEvent::ResolveFailed {
                advertisement,
                code,
            } => match &self.adopted {
                // A losing race after a winner was adopted is not a session failure
                Some(adopted) => tracing::debug!(
                    "Ignoring resolve failure for {} (code {}), using {}",
                    advertisement.instance_name,
                    code,
                    adopted
                ),
                None => self.publish(SessionEvent::Failed(Error::ResolveFailed(code))),
            },
            DiscoveryEvent::ServiceFound(advertisement) => {
                tracing::trace!("Found {}", advertisement.instance_name);
            }
        }
    }

    fn publish(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("No session event listener");
        }
    }
}
