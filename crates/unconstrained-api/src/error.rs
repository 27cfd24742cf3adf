//! Error types for unconstrained-api

use thiserror::Error;

/// Result type alias using unconstrained-api Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the assistants API
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error (status {status}): {message} (type: {error_type})")]
    Api {
        status: u16,
        error_type: String,
        message: String,
    },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Requested object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Create an API error from status, type and message
    pub fn api(status: u16, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::RateLimited { .. } => true,
            Error::Api {
                status,
                error_type,
                message,
            } => {
                if *status >= 500 {
                    return true;
                }
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("rate_limit")
                    || et.contains("server_error")
                    || msg.contains("rate limit")
                    || msg.contains("overloaded")
                    || msg.contains("too many requests")
            }
            _ => false,
        }
    }

    /// Check if this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_)) || matches!(self, Error::Api { status: 404, .. })
    }
}
