//! Pending authorization records (ephemeral CSRF state).

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::constants::STATE_TTL_SECONDS;

/// A not-yet-redeemed authorization attempt.
///
/// Created when a user is sent to the provider's consent page and destroyed
/// on the first callback that presents its `state_id` (or by the expiry
/// sweep). The `code_verifier` never leaves the broker: it is stored here and
/// only ever forwarded to the provider's token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    /// Opaque random token echoed back by the provider on callback.
    pub state_id: String,

    /// PKCE code verifier generated alongside the challenge.
    pub code_verifier: String,

    /// User who initiated the flow.
    pub requesting_user_id: Uuid,

    /// Deployment domain the callback must arrive on.
    pub domain: String,

    /// Where to send the browser after a successful connection.
    pub redirect_target: Option<String>,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingAuthorization {
    /// Build a pending record expiring [`STATE_TTL_SECONDS`] from now.
    ///
    /// The caller supplies the random material; see
    /// `tokenbridge_core::pkce` for generation.
    #[must_use]
    pub fn new(
        state_id: String,
        code_verifier: String,
        requesting_user_id: Uuid,
        domain: String,
        redirect_target: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            state_id,
            code_verifier,
            requesting_user_id,
            domain,
            redirect_target,
            created_at: now,
            expires_at: now + Duration::seconds(STATE_TTL_SECONDS),
        }
    }

    /// Whether the record is past its TTL at the given instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
