//! OAuth 2.0 token material returned by the provider.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::constants::DEFAULT_TOKEN_LIFETIME_SECONDS;

/// Access and refresh tokens with metadata, as returned by a token-endpoint
/// exchange.
///
/// This type holds plaintext secrets and therefore must stay inside the
/// broker's trust boundary: it is never serialized, never logged, and lives
/// only long enough to be encrypted for storage (or handed to a consumer as a
/// bare access token).
#[derive(Clone)]
pub struct TokenSet {
    pub access_token: String,

    /// Optional because some grants omit it (e.g. when `offline.access` was
    /// not requested or the provider chose not to rotate).
    pub refresh_token: Option<String>,

    /// Granted scopes as reported by the provider.
    pub scopes: Vec<String>,

    /// Absolute expiry computed from `expires_in` at exchange time.
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl TokenSet {
    /// Build a token set from raw exchange results, computing the absolute
    /// expiry from the relative lifetime.
    #[must_use]
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        scopes: Vec<String>,
        expires_in: i64,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            scopes,
            expires_at: Utc::now() + Duration::seconds(expires_in),
        }
    }

    /// Whether the access token is expired or will expire within
    /// `threshold_seconds`.
    #[must_use]
    pub fn is_expired(&self, threshold_seconds: i64) -> bool {
        Utc::now() + Duration::seconds(threshold_seconds) >= self.expires_at
    }

    /// Seconds of lifetime remaining (negative once expired).
    #[must_use]
    pub fn seconds_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds()
    }
}

/// Wire shape of a token-endpoint response (RFC 6749 §5.1).
#[derive(Debug, Deserialize)]
pub struct TokenEndpointResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

impl From<TokenEndpointResponse> for TokenSet {
    fn from(response: TokenEndpointResponse) -> Self {
        let scopes = response
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();
        Self::new(
            response.access_token,
            response.refresh_token,
            scopes,
            response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECONDS),
        )
    }
}
