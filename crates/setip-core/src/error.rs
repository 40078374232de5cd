//! Error types for the setip system
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

use crate::rule::RedirectRule;

/// Result type alias for setip operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the setip system
#[derive(Error, Debug)]
pub enum Error {
    /// Name, label or token missing before any mutation was attempted
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// NAT state could not be inspected or changed for privilege reasons
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Every discovery source was exhausted without a valid address
    #[error("No external IPv4 address could be determined from any source")]
    AddressUnavailable,

    /// Directory service answered with anything other than HTTP 200
    #[error("Registration failed with HTTP {status}: {body}")]
    RegistrationFailed {
        /// HTTP status code
        status: u16,
        /// Response body as received
        body: String,
    },

    /// A suspended redirect rule could not be reinstalled
    #[error("Failed to restore redirect rule {rule}")]
    RestorationFailed {
        /// The rule left uninstalled
        rule: RedirectRule,
    },

    /// Other NAT table errors (command failures, malformed output)
    #[error("NAT error: {0}")]
    Nat(String),

    /// Address source errors
    #[error("Address source error: {0}")]
    IpSource(String),

    /// Registration transport errors
    #[error("Registrar error: {0}")]
    Registrar(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another run holds the host-local lock
    #[error("Another run holds the lock: {0}")]
    Locked(String),

    /// The run was interrupted by a shutdown signal
    #[error("Interrupted by shutdown signal")]
    Interrupted,

    /// IO errors
    #[error("IO error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a missing-credentials error
    pub fn missing_credentials(msg: impl Into<String>) -> Self {
        Self::MissingCredentials(msg.into())
    }

    /// Create a permission-denied error
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a NAT table error
    pub fn nat(msg: impl Into<String>) -> Self {
        Self::Nat(msg.into())
    }

    /// Create an address source error
    pub fn ip_source(msg: impl Into<String>) -> Self {
        Self::IpSource(msg.into())
    }

    /// Create a registrar error
    pub fn registrar(msg: impl Into<String>) -> Self {
        Self::Registrar(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// True when the failure is a privilege problem rather than a missing rule
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
