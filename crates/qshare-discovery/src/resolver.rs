//! Endpoint resolver
//!
//! Browses for a single service type and resolves the first matching
//! advertisement into an [`Endpoint`]. Results are delivered as a stream of
//! [`DiscoveryEvent`]s consumed by one coordinating task.
//!
//! # State Machine
//!
//! ```text
//!          start_discovery()
//!   Idle ─────────────────────> Discovering ──(browse error)──> Failed
//!    ^                              │
//!    │                      ServiceFound (match)
//!    │                              v
//!    └────────(resolved)──────── Resolving ──(resolve error)──> Failed
//! ```
//!
//! After a resolution the browse stays active (monitoring continues) but the
//! resolver reports `Idle`. A failed resolver only browses again when
//! [`EndpointResolver::start_discovery`] is called.

use crate::backend::{
    Advertisement, BrowseEvent, BrowseReceiver, DiscoveryBackend, ResolvedService, SERVICE_TYPE,
    service_type_matches,
};
use crate::endpoint::Endpoint;
use crate::error::FailureCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::{JoinHandle, JoinSet};

/// Resolver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    /// Not browsing, or browsing with a resolved endpoint
    Idle,
    /// Browsing, nothing resolved yet
    Discovering,
    /// At least one resolve in flight
    Resolving,
    /// Last browse or resolve attempt failed
    Failed,
}

/// Events produced by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A matching advertisement was found
    ServiceFound(Advertisement),
    /// A matching advertisement went away
    ServiceLost(Advertisement),
    /// An advertisement resolved and won; its endpoint should become current
    Resolved {
        /// Full resolution result
        service: ResolvedService,
        /// Endpoint derived from the resolution
        endpoint: Endpoint,
    },
    /// Browsing could not be started
    DiscoveryStartFailed(FailureCode),
    /// Resolving an advertisement failed
    ResolveFailed {
        /// Advertisement that failed to resolve
        advertisement: Advertisement,
        /// Backend failure code
        code: FailureCode,
    },
}

/// Resolver configuration
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Service type to browse for
    pub service_type: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            service_type: SERVICE_TYPE.to_string(),
        }
    }
}

/// Receiving end of the resolver's event stream
pub struct DiscoveryEvents {
    rx: mpsc::UnboundedReceiver<DiscoveryEvent>,
}

impl DiscoveryEvents {
    /// Wait for the next event
    ///
    /// Returns `None` once the resolver has been dropped.
    pub async fn next(&mut self) -> Option<DiscoveryEvent> {
        self.rx.recv().await
    }

    /// Take an already queued event without waiting
    pub fn try_next(&mut self) -> Option<DiscoveryEvent> {
        self.rx.try_recv().ok()
    }
}

struct Shared {
    state: RwLock<ResolverState>,
    generation: AtomicU64,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn emit(&self, generation: u64, event: DiscoveryEvent) {
        if self.is_current(generation) {
            // Receiver gone means nobody is listening anymore
            let _ = self.events.send(event);
        }
    }

    async fn set_state(&self, generation: u64, state: ResolverState) {
        if self.is_current(generation) {
            let mut current = self.state.write().await;
            if *current != state {
                tracing::debug!("Resolver state {:?} -> {:?}", *current, state);
                *current = state;
            }
        }
    }
}

struct Subscription {
    task: JoinHandle<()>,
}

/// Discovers a peer and resolves it to an endpoint
pub struct EndpointResolver<B: DiscoveryBackend> {
    backend: Arc<B>,
    config: ResolverConfig,
    shared: Arc<Shared>,
    subscription: Mutex<Option<Subscription>>,
}

impl<B: DiscoveryBackend> EndpointResolver<B> {
    /// Create a resolver and its event stream
    #[must_use]
    pub fn new(backend: Arc<B>, config: ResolverConfig) -> (Self, DiscoveryEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let resolver = Self {
            backend,
            config,
            shared: Arc::new(Shared {
                state: RwLock::new(ResolverState::Idle),
                generation: AtomicU64::new(0),
                events: tx,
            }),
            subscription: Mutex::new(None),
        };
        (resolver, DiscoveryEvents { rx })
    }

    /// Current state
    pub async fn state(&self) -> ResolverState {
        *self.shared.state.read().await
    }

    /// Whether a browse subscription is active
    pub async fn is_discovering(&self) -> bool {
        self.subscription.lock().await.is_some()
    }

    /// Service type being browsed
    #[must_use]
    pub fn service_type(&self) -> &str {
        &self.config.service_type
    }

    /// Start browsing
    ///
    /// Any active subscription is torn down first, so calling this twice
    /// leaves exactly one subscription. Failures are reported as
    /// [`DiscoveryEvent::DiscoveryStartFailed`].
    pub async fn start_discovery(&self) {
        let mut subscription = self.subscription.lock().await;
        if let Some(previous) = subscription.take() {
            tracing::debug!("Restarting discovery, tearing down previous browse");
            self.teardown(previous).await;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared
            .set_state(generation, ResolverState::Discovering)
            .await;

        match self.backend.browse(&self.config.service_type).await {
            Ok(rx) => {
                tracing::info!("Browsing for {}", self.config.service_type);
                let pump = BrowsePump {
                    backend: Arc::clone(&self.backend),
                    shared: Arc::clone(&self.shared),
                    service_type: self.config.service_type.clone(),
                    generation,
                    winner: None,
                };
                let task = tokio::spawn(pump.run(rx));
                *subscription = Some(Subscription { task });
            }
            Err(code) => {
                tracing::warn!(
                    "Failed to start discovery for {}: code {}",
                    self.config.service_type,
                    code
                );
                self.shared.set_state(generation, ResolverState::Failed).await;
                self.shared
                    .emit(generation, DiscoveryEvent::DiscoveryStartFailed(code));
            }
        }
    }

    /// Stop browsing and cancel in-flight resolves
    ///
    /// No-op when not discovering. Backend teardown errors are ignored.
    pub async fn stop_discovery(&self) {
        let mut subscription = self.subscription.lock().await;
        if let Some(previous) = subscription.take() {
            self.teardown(previous).await;
            *self.shared.state.write().await = ResolverState::Idle;
            tracing::info!("Stopped browsing for {}", self.config.service_type);
        }
    }

    async fn teardown(&self, subscription: Subscription) {
        // Invalidate before aborting so a pump mid-poll cannot emit
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        subscription.task.abort();

        if let Err(code) = self.backend.stop_browse(&self.config.service_type).await {
            tracing::debug!("Ignoring stop_browse failure during teardown: code {}", code);
        }
    }
}

impl<B: DiscoveryBackend> Drop for EndpointResolver<B> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.get_mut().take() {
            self.shared.generation.fetch_add(1, Ordering::AcqRel);
            subscription.task.abort();
        }
    }
}

type ResolveOutcome = (Advertisement, Result<ResolvedService, FailureCode>);

/// Task owning one browse subscription and its resolves
struct BrowsePump<B: DiscoveryBackend> {
    backend: Arc<B>,
    shared: Arc<Shared>,
    service_type: String,
    generation: u64,
    /// Instance whose resolution was adopted
    winner: Option<String>,
}

impl<B: DiscoveryBackend> BrowsePump<B> {
    async fn run(mut self, mut rx: BrowseReceiver) {
        let mut resolves: JoinSet<ResolveOutcome> = JoinSet::new();

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(BrowseEvent::Found(advertisement)) => {
                        self.on_found(advertisement, &mut resolves).await;
                    }
                    Some(BrowseEvent::Lost(advertisement)) => self.on_lost(advertisement),
                    None => break,
                },
                Some(joined) = resolves.join_next(), if !resolves.is_empty() => {
                    self.on_joined(joined, resolves.len()).await;
                }
            }
        }

        tracing::debug!("Browse subscription closed by backend");
        while let Some(joined) = resolves.join_next().await {
            self.on_joined(joined, resolves.len()).await;
        }
    }

    async fn on_found(
        &mut self,
        advertisement: Advertisement,
        resolves: &mut JoinSet<ResolveOutcome>,
    ) {
        if !service_type_matches(&advertisement.service_type, &self.service_type) {
            tracing::trace!(
                "Ignoring {} of type {}",
                advertisement.instance_name,
                advertisement.service_type
            );
            return;
        }

        tracing::debug!("Service found: {}", advertisement.instance_name);
        self.shared.emit(
            self.generation,
            DiscoveryEvent::ServiceFound(advertisement.clone()),
        );

        if let Some(winner) = &self.winner {
            tracing::debug!(
                "Already resolved {}, not resolving {}",
                winner,
                advertisement.instance_name
            );
            return;
        }

        self.shared
            .set_state(self.generation, ResolverState::Resolving)
            .await;

        let backend = Arc::clone(&self.backend);
        resolves.spawn(async move {
            let result = backend.resolve(&advertisement).await;
            (advertisement, result)
        });
    }

    fn on_lost(&mut self, advertisement: Advertisement) {
        if !service_type_matches(&advertisement.service_type, &self.service_type) {
            return;
        }

        tracing::debug!("Service lost: {}", advertisement.instance_name);
        if self.winner.as_deref() == Some(advertisement.instance_name.as_str()) {
            self.winner = None;
        }
        self.shared
            .emit(self.generation, DiscoveryEvent::ServiceLost(advertisement));
    }

    async fn on_joined(
        &mut self,
        joined: Result<ResolveOutcome, tokio::task::JoinError>,
        remaining: usize,
    ) {
        let failed = match joined {
            Ok((advertisement, Ok(service))) => match service.endpoint() {
                Some(endpoint) => {
                    self.adopt(service, endpoint);
                    false
                }
                None => {
                    self.resolve_failed(advertisement, FailureCode::NO_ADDRESS);
                    true
                }
            },
            Ok((advertisement, Err(code))) => {
                self.resolve_failed(advertisement, code);
                true
            }
            Err(err) => {
                tracing::warn!("Resolve task ended abnormally: {}", err);
                true
            }
        };

        let state = if remaining > 0 {
            ResolverState::Resolving
        } else if self.winner.is_some() || !failed {
            ResolverState::Idle
        } else {
            ResolverState::Failed
        };
        self.shared.set_state(self.generation, state).await;
    }

    fn adopt(&mut self, service: ResolvedService, endpoint: Endpoint) {
        if self.winner.is_some() {
            tracing::debug!(
                "Dropping late resolution of {} ({})",
                service.instance_name,
                endpoint
            );
            return;
        }

        tracing::info!("Resolved {} to {}", service.instance_name, endpoint);
        self.winner = Some(service.instance_name.clone());
        self.shared
            .emit(self.generation, DiscoveryEvent::Resolved { service, endpoint });
    }

    fn resolve_failed(&self, advertisement: Advertisement, code: FailureCode) {
        tracing::warn!(
            "Failed to resolve {}: code {}",
            advertisement.instance_name,
            code
        );
        self.shared.emit(
            self.generation,
            DiscoveryEvent::ResolveFailed {
                advertisement,
                code,
            },
        );
    }
}
