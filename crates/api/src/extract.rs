//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::ApiError;

/// Header the upstream gateway uses to assert the caller's identity. The
/// broker trusts its gateway; it performs no session validation of its own.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller, taken from the gateway-injected header.
#[derive(Debug, Clone, Copy)]
pub struct UserId(pub Uuid);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::invalid_request("missing x-user-id header"))?;
        let user_id = Uuid::parse_str(raw)
            .map_err(|_| ApiError::invalid_request("x-user-id is not a valid UUID"))?;
        Ok(Self(user_id))
    }
}

/// Best-effort client address for audit entries, from the proxy chain.
#[must_use]
pub fn source_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}
