//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Send queue bound must be at least 1")]
    InvalidQueueBound,

    #[error("Auto-fragment size must not exceed max message size")]
    FragmentExceedsMaxMessage,

    #[error("Max message size must be at least 1 KiB")]
    MaxMessageTooSmall,

    #[error("Auth issuer must use HTTPS in production")]
    IssuerMustBeHttps,
}
