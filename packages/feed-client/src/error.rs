//! Error types for the feed client.

use thiserror::Error;

/// Result type for feed client operations.
pub type Result<T> = std::result::Result<T, FeedError>;

/// Feed client errors.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// API error (non-2xx response, rate limit, invalid filter)
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Parse error (invalid JSON, missing count)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FeedError::Parse(err.to_string())
        } else {
            FeedError::Network(err.to_string())
        }
    }
}
