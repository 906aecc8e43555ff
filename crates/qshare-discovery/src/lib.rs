//! # QShare Discovery
//!
//! Finds a QShare peer on the local network and resolves it to a connectable
//! endpoint.
//!
//! This crate provides:
//! - [`Endpoint`]: resolved `host:port`, rendered as `http://{host}:{port}`
//! - [`DiscoveryBackend`]: seam over the platform discovery facility
//! - [`MdnsBackend`]: DNS-SD over multicast using `mdns-sd`
//! - [`EndpointResolver`]: browse/resolve state machine producing a stream
//!   of [`DiscoveryEvent`]s
//!
//! ## Example
//!
//! ```rust,no_run
//! use qshare_discovery::{DiscoveryEvent, EndpointResolver, MdnsBackend, MdnsConfig, ResolverConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), qshare_discovery::DiscoveryError> {
//! let backend = Arc::new(MdnsBackend::new(MdnsConfig::default())?);
//! let (resolver, mut events) = EndpointResolver::new(backend, ResolverConfig::default());
//!
//! resolver.start_discovery().await;
//! while let Some(event) = events.next().await {
//!     if let DiscoveryEvent::Resolved { endpoint, .. } = event {
//!         println!("peer at {endpoint}");
//!         break;
//!     }
//! }
//! resolver.stop_discovery().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod endpoint;
pub mod error;
pub mod mdns;
pub mod resolver;

pub use backend::{
    Advertisement, BrowseEvent, BrowseReceiver, DiscoveryBackend, ResolvedService, SERVICE_TYPE,
    normalize_service_type, service_type_matches,
};
pub use endpoint::Endpoint;
pub use error::{DiscoveryError, FailureCode};
pub use mdns::{MdnsBackend, MdnsConfig};
pub use resolver::{
    DiscoveryEvent, DiscoveryEvents, EndpointResolver, ResolverConfig, ResolverState,
};
