//! Error types for the Turnstile crate.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Admission checks never fail; these errors come from the layers around
/// the limiter (configuration, quota construction, serving).
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A quota with a zero limit or zero window
    #[error("Invalid quota: {0}")]
    InvalidQuota(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for TurnstileError {
    fn from(err: ::config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
