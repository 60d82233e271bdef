//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the token broker.
///
/// Internal subsystems map their own failures into this enum; the HTTP
/// boundary maps it further down into the closed wire error codes. Variants
/// never carry token plaintext or provider response bodies.
#[derive(Error, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum BrokerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Security error: {0}")]
    Security(String),

    /// Unknown, expired, or replayed state parameter on the OAuth callback.
    #[error("State validation failed: {0}")]
    CsrfDetected(String),

    /// No linked account exists for the requesting user.
    #[error("No linked account for user")]
    NotConnected,

    /// The stored credential is no longer usable; the user must run the
    /// authorization flow again.
    #[error("Account requires re-authorization: {0}")]
    ReconnectRequired(String),

    /// Transient provider or network failure; the caller may retry later.
    #[error("Provider temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),

    /// The provider refused the authorization itself (user denied consent,
    /// rejected code, bad client credentials).
    #[error("Provider denied the request: {0}")]
    ProviderDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;
