//! Error types for the BrowserPilot SDK.

use thiserror::Error;

/// Errors that can occur when using the BrowserPilot SDK.
///
/// Transport and parse failures on an established socket are absorbed at the
/// channel boundary (logged, surfaced as session events where the contract
/// requires it) and never reach subscriber code as errors; this enum covers
/// the request/response surface and initial connection setup.
#[derive(Error, Debug)]
pub enum PilotError {
    /// An error returned by the BrowserPilot API.
    #[error("API error ({status}): {message}")]
    Api {
        /// The error message from the API.
        message: String,
        /// The HTTP status code.
        status: u16,
    },

    /// An HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl PilotError {
    /// Create a new API error.
    pub fn api(message: impl Into<String>, status: u16) -> Self {
        Self::Api {
            message: message.into(),
            status,
        }
    }

    /// Check if this is a retryable error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status >= 500 && *status <= 599,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Check if this is a not-found error (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    /// Get the HTTP status code, if this is an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for BrowserPilot operations.
pub type Result<T> = std::result::Result<T, PilotError>;
