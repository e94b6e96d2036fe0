//! Error types for Gatekeeper
//!
//! Expected conditions (rate limits, username conflicts, non-membership) are
//! typed outcomes elsewhere; this enum carries the genuinely exceptional ones.

use hyper::StatusCode;

/// Main error type for Gatekeeper operations
#[derive(Debug, thiserror::Error)]
pub enum GatekeeperError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatekeeperError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Http(_) | Self::Upstream { .. } | Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for GatekeeperError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for GatekeeperError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for GatekeeperError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Http(format!("request timed out: {}", err))
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Result type alias for Gatekeeper operations
pub type Result<T> = std::result::Result<T, GatekeeperError>;
