//! Error types for mailgate

use thiserror::Error;

/// Main error type for mailgate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Unsupported envelope: {0}")]
    UnsupportedEnvelope(String),

    #[error("Authentication failure: {0}")]
    AuthFailure(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for mailgate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Store(_) => 500,
            Error::UnsupportedEnvelope(_) => 400,
            Error::AuthFailure(_) => 400,
            Error::Validation(_) => 400,
            // Account lookups surface as client failures; the message
            // endpoints remap this to 404 at the API layer.
            Error::NotFound(_) => 400,
            Error::Upstream(_) => 400,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Store(_) => "STORE_ERROR",
            Error::UnsupportedEnvelope(_) => "UNSUPPORTED_ENVELOPE",
            Error::AuthFailure(_) => "AUTH_FAILURE",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Upstream(_) => "UPSTREAM_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}
