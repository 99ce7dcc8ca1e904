//! Error types for the registry client.

use thiserror::Error;

/// Result type for registry client operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Credential exchange failure.
///
/// Cloneable so a single failed refresh can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Token endpoint unreachable
    #[error("token request failed: {0}")]
    Network(String),

    /// Token endpoint answered with a non-2xx status
    #[error("token request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Token response could not be decoded
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// Registry client errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Could not obtain a bearer token
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// API error (non-2xx response)
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Parse error (invalid JSON)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl RegistryError {
    /// Auth failures are fatal to every stage that talks to the registry.
    pub fn is_auth(&self) -> bool {
        matches!(self, RegistryError::Auth(_))
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RegistryError::Parse(err.to_string())
        } else {
            RegistryError::Network(err.to_string())
        }
    }
}
