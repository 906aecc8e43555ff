//! Discovery error types

use std::fmt;
use thiserror::Error;

/// Opaque failure code reported by a discovery backend
///
/// Codes are not interpreted by the resolver; they are carried to the caller
/// so it can decide whether to restart discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FailureCode(pub i32);

impl FailureCode {
    /// Unspecified backend failure
    pub const INTERNAL_ERROR: Self = Self(0);
    /// The backend already has an active operation for this request
    pub const ALREADY_ACTIVE: Self = Self(3);
    /// The backend refused because too many requests are outstanding
    pub const MAX_LIMIT: Self = Self(4);
    /// The operation did not finish in time
    pub const TIMEOUT: Self = Self(5);
    /// The service resolved but carried no usable address
    pub const NO_ADDRESS: Self = Self(6);

    /// Raw numeric value
    #[must_use]
    pub fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Browsing could not be started
    #[error("Discovery start failed (code {0})")]
    StartFailed(FailureCode),

    /// An advertisement could not be resolved
    #[error("Resolve failed (code {0})")]
    ResolveFailed(FailureCode),

    /// The mDNS daemon reported an error
    #[error("mDNS error: {0}")]
    Mdns(String),

    /// A manually supplied endpoint could not be parsed
    #[error("Invalid endpoint '{0}' (expected host:port)")]
    InvalidEndpoint(String),
}

impl DiscoveryError {
    /// Failure code carried by start/resolve failures
    #[must_use]
    pub fn code(&self) -> Option<FailureCode> {
        match self {
            Self::StartFailed(code) | Self::ResolveFailed(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<mdns_sd::Error> for DiscoveryError {
    fn from(err: mdns_sd::Error) -> Self {
        Self::Mdns(err.to_string())
    }
}
