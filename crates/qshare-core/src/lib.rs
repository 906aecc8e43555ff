//! # QShare Core
//!
//! Client core for QShare: talks to a file-sharing peer found on the local
//! network.
//!
//! This crate provides:
//! - [`TransferClient`]: list, upload and download over the peer's HTTP API
//! - [`SessionCoordinator`]: current endpoint and listing, stale-result guards
//! - [`SessionDriver`]: feeds resolver events into the session
//! - [`Error`]: closed error taxonomy shared by all operations
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Presentation (out of scope)              │
//! ├──────────────────────────────────────────────────────────┤
//! │   SessionCoordinator  <── SessionDriver <── resolver     │
//! │   (endpoint, listing)        events (qshare-discovery)   │
//! ├──────────────────────────────────────────────────────────┤
//! │   TransferClient (reqwest, shared connection pool)       │
//! └──────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod io;
pub mod session;
pub mod transfer;
pub mod types;

pub use error::{Error, Result};
pub use io::{
    DownloadSink, FALLBACK_UPLOAD_NAME, create_download_sink, read_upload_source, upload_name,
};
pub use session::{DriverConfig, SessionCoordinator, SessionDriver, SessionEvent, UploadOutcome};
pub use transfer::{TransferClient, TransferConfig};
pub use types::{FileEntry, FileListing, PeerStatus, UploadAck};

pub use qshare_discovery::Endpoint;
