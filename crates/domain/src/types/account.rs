//! Linked external accounts and their encrypted credentials.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::crypto::EncryptedData;

/// Identity of the external account as reported by the provider's profile
/// endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProfile {
    /// Provider-side account id (stable, unlike the handle).
    pub external_account_id: String,
    /// Current handle (e.g. `@user`, without the sigil).
    pub handle: String,
    pub display_name: Option<String>,
}

/// Wire shape of the provider's `users/me` style response.
#[derive(Debug, Deserialize)]
pub struct ProfileEndpointResponse {
    pub data: ProfileData,
}

#[derive(Debug, Deserialize)]
pub struct ProfileData {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
}

impl From<ProfileEndpointResponse> for ExternalProfile {
    fn from(response: ProfileEndpointResponse) -> Self {
        Self {
            external_account_id: response.data.id,
            handle: response.data.username,
            display_name: response.data.name,
        }
    }
}

/// A user's connection to an external account, with credentials encrypted at
/// rest.
///
/// Token material only ever appears here as [`EncryptedData`]; decryption
/// happens transiently inside the refresh coordinator and the callback flow.
/// Rows are soft-deleted (`is_active = false`) on revocation so the audit
/// trail keeps a referent.
#[derive(Debug, Clone)]
pub struct LinkedAccount {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub external_account_id: String,
    pub external_handle: String,
    pub display_name: Option<String>,

    pub access_token_ciphertext: EncryptedData,
    /// Absent when the grant did not include a refresh token.
    pub refresh_token_ciphertext: Option<EncryptedData>,

    pub granted_scopes: Vec<String>,
    pub token_expires_at: DateTime<Utc>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LinkedAccount {
    /// Seconds of access-token lifetime remaining (negative once expired).
    #[must_use]
    pub fn seconds_until_expiry(&self) -> i64 {
        (self.token_expires_at - Utc::now()).num_seconds()
    }

    /// Whether the stored access token expires within `threshold_seconds`.
    #[must_use]
    pub fn needs_refresh(&self, threshold_seconds: i64) -> bool {
        self.seconds_until_expiry() < threshold_seconds
    }
}
