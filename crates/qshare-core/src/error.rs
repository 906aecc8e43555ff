//! Error types for the QShare client core
//!
//! Every core operation returns [`Result`]. The error enum is closed so callers
//! branch on the kind rather than on message text; nothing in the core panics
//! or escalates these conditions.
//!
//! # Example
//!
//! ```no_run
//! use qshare_core::Error;
//!
//! fn notify(err: &Error) {
//!     match err {
//!         Error::NotConnected => println!("Still looking for a peer"),
//!         Error::HttpStatus(code) => println!("Peer refused the request ({code})"),
//!         other if other.is_transient() => println!("Try again: {other}"),
//!         other => println!("Failed: {other}"),
//!     }
//! }
//! ```

use qshare_discovery::{DiscoveryError, FailureCode};
use thiserror::Error;

/// Errors returned by discovery, transfer and session operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // ============ Discovery Errors ============
    /// Browsing for peers could not be started
    #[error("Discovery start failed (code {0})")]
    DiscoveryStartFailed(FailureCode),

    /// A discovered peer could not be resolved
    #[error("Resolve failed (code {0})")]
    ResolveFailed(FailureCode),

    // ============ Session Errors ============
    /// No endpoint has been resolved yet
    #[error("Not connected to a peer")]
    NotConnected,

    /// The endpoint changed while the request was in flight; result discarded
    #[error("Peer changed while the request was in flight")]
    EndpointChanged,

    // ============ Transfer Errors ============
    /// Connect or response timeout exceeded
    #[error("Request timed out")]
    Timeout,

    /// Peer answered with a non-success status
    #[error("Peer returned HTTP {0}")]
    HttpStatus(u16),

    /// Response body did not have the expected shape
    #[error("Malformed response: {0}")]
    Parse(String),

    /// Response carried no body where one was required
    #[error("Response has no body")]
    EmptyBody,

    /// Connection-level failure (refused, reset, unreachable)
    #[error("Transport error: {0}")]
    Transport(String),

    // ============ Collaborator I/O Errors ============
    /// Upload source could not be opened or read
    #[error("Upload source unavailable: {0}")]
    SourceUnavailable(String),

    /// Download destination could not be created or written
    #[error("Failed to write download: {0}")]
    SinkWriteFailed(String),
}

impl Error {
    /// Returns true if repeating the operation later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout
            | Error::Transport(_)
            | Error::EndpointChanged
            | Error::DiscoveryStartFailed(_)
            | Error::ResolveFailed(_) => true,
            Error::HttpStatus(code) => *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else if let Some(status) = err.status() {
            Error::HttpStatus(status.as_u16())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl From<DiscoveryError> for Error {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::StartFailed(code) => Error::DiscoveryStartFailed(code),
            DiscoveryError::ResolveFailed(code) => Error::ResolveFailed(code),
            DiscoveryError::Mdns(_) => Error::DiscoveryStartFailed(FailureCode::INTERNAL_ERROR),
            DiscoveryError::InvalidEndpoint(endpoint) => {
                Error::Parse(format!("invalid endpoint '{endpoint}'"))
            }
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
