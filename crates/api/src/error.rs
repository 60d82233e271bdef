//! Wire-level error responses.
//!
//! The error vocabulary is closed: every failure maps to one of the codes
//! below, and response bodies are always `{ "error": code, "message": … }`.
//! Provider response bodies are never forwarded to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokenbridge_domain::BrokerError;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    CsrfFailed,
    ProviderDenied,
    TemporarilyUnavailable,
    ReconnectRequired,
    NotConnected,
    NotFound,
    InvalidRequest,
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CsrfFailed => "csrf_failed",
            Self::ProviderDenied => "provider_denied",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::ReconnectRequired => "reconnect_required",
            Self::NotConnected => "not_connected",
            Self::NotFound => "not_found",
            Self::InvalidRequest => "invalid_request",
            Self::InternalError => "internal_error",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            Self::CsrfFailed | Self::ProviderDenied | Self::InvalidRequest => {
                StatusCode::BAD_REQUEST
            }
            Self::ReconnectRequired => StatusCode::UNAUTHORIZED,
            Self::NotConnected | Self::NotFound => StatusCode::NOT_FOUND,
            Self::TemporarilyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn not_found() -> Self {
        Self::new(ErrorCode::NotFound, "resource not found")
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: self.code.as_str(), message: self.message };
        (self.code.status(), Json(body)).into_response()
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::CsrfDetected(msg) => Self::new(ErrorCode::CsrfFailed, msg),
            BrokerError::ProviderDenied(msg) => Self::new(ErrorCode::ProviderDenied, msg),
            BrokerError::TemporarilyUnavailable(_) => Self::new(
                ErrorCode::TemporarilyUnavailable,
                "the identity provider is temporarily unavailable",
            ),
            BrokerError::ReconnectRequired(msg) => Self::new(ErrorCode::ReconnectRequired, msg),
            BrokerError::NotConnected => {
                Self::new(ErrorCode::NotConnected, "no linked account for this user")
            }
            BrokerError::NotFound(msg) => Self::new(ErrorCode::NotFound, msg),
            BrokerError::InvalidInput(msg) => Self::new(ErrorCode::InvalidRequest, msg),
            BrokerError::Database(_)
            | BrokerError::Config(_)
            | BrokerError::Security(_)
            | BrokerError::Internal(_) => {
                // Internal detail stays in the logs, not on the wire.
                error!(error = %err, "request failed internally");
                Self::new(ErrorCode::InternalError, "internal error")
            }
        }
    }
}
