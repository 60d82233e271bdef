//! Port interfaces between the protocol logic and the infrastructure.
//!
//! Infra supplies the implementations (sqlite repositories, the provider
//! HTTP client, the AES-GCM cipher, the buffered audit writer); tests supply
//! in-memory doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokenbridge_domain::{
    AuditEvent, EncryptedData, ExternalProfile, LinkedAccount, PendingAuthorization, Result,
    TokenSet,
};
use uuid::Uuid;

/// Why a pending authorization could not be consumed.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// Unknown state id, or a second redemption of one already consumed.
    #[error("state parameter not found")]
    NotFound,

    /// The record existed but was past its TTL; it has been deleted.
    #[error("state parameter expired")]
    Expired,

    #[error(transparent)]
    Backend(#[from] tokenbridge_domain::BrokerError),
}

/// Storage for pending authorizations (ephemeral CSRF state).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist a freshly minted pending authorization.
    async fn create(&self, pending: &PendingAuthorization) -> Result<()>;

    /// Atomically read and delete the record for `state_id`.
    ///
    /// Linearizable per state id: when two callbacks race on the same id,
    /// exactly one gets the record and the other observes
    /// [`ConsumeError::NotFound`]. Expired records are deleted as a side
    /// effect and reported as [`ConsumeError::Expired`].
    async fn consume_once(
        &self,
        state_id: &str,
    ) -> std::result::Result<PendingAuthorization, ConsumeError>;

    /// Delete every record whose TTL elapsed before `now`. Best-effort
    /// housekeeping; consumption enforces the TTL on its own.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Replacement credential material written after a successful refresh.
#[derive(Debug, Clone)]
pub struct CredentialUpdate {
    pub access_token_ciphertext: EncryptedData,
    /// `None` keeps the stored refresh token (provider did not rotate).
    pub refresh_token_ciphertext: Option<EncryptedData>,
    pub token_expires_at: DateTime<Utc>,
    pub refreshed_at: DateTime<Utc>,
}

/// Durable storage for linked accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert or fully replace the credential record, idempotent by
    /// `(owner_user_id, external_account_id)`. Returns the canonical row id
    /// (the existing one on conflict). Reconnecting reactivates a revoked
    /// row.
    async fn upsert(&self, account: &LinkedAccount) -> Result<Uuid>;

    /// Most recently updated account for a user, active or not.
    async fn get_for_use(&self, owner_user_id: Uuid) -> Result<Option<LinkedAccount>>;

    async fn get_by_id(&self, account_id: Uuid) -> Result<Option<LinkedAccount>>;

    /// Replace token ciphertexts and expiry in place after a refresh.
    async fn update_tokens(&self, account_id: Uuid, update: &CredentialUpdate) -> Result<()>;

    /// Soft-delete: flip `is_active` off. The row is never removed.
    async fn mark_inactive(&self, account_id: Uuid) -> Result<()>;
}

/// Failure taxonomy for provider token-endpoint calls.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Terminal: the grant (code or refresh token) was rejected. The flow
    /// must restart from authorization.
    #[error("provider rejected the grant")]
    InvalidGrant,

    /// Connection-level failure; retryable.
    #[error("network error calling provider: {0}")]
    Network(String),

    /// Provider answered 5xx; retryable with backoff.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Response did not match the OAuth 2.0 wire contract.
    #[error("unexpected provider response: {0}")]
    Protocol(String),
}

impl ExchangeError {
    /// Whether a fresh attempt could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::ProviderUnavailable(_))
    }
}

/// Client for the provider's OAuth 2.0 endpoints.
///
/// Implementations own timeout and bounded-retry behaviour: no retry for
/// 4xx, at most two backed-off retries for 5xx/network failures.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// `grant_type=authorization_code` with the PKCE verifier.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> std::result::Result<TokenSet, ExchangeError>;

    /// `grant_type=refresh_token`. The returned set may carry a rotated
    /// refresh token which must replace the stored one.
    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<TokenSet, ExchangeError>;

    /// Best-effort remote revocation of an access token.
    async fn revoke_token(&self, access_token: &str) -> std::result::Result<(), ExchangeError>;

    /// Fetch the external account's identity with a bearer token.
    async fn fetch_profile(
        &self,
        access_token: &str,
    ) -> std::result::Result<ExternalProfile, ExchangeError>;
}

/// Symmetric authenticated encryption for credentials at rest.
///
/// Held only by the authorization flow, the refresh coordinator and the
/// revocation service; nothing else in the workspace can decrypt.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedData>;
    fn decrypt(&self, data: &EncryptedData) -> Result<Vec<u8>>;
}

/// Append-only audit trail.
///
/// `record` is fire-and-forget from the caller's perspective; the
/// implementation is responsible for buffering and retrying so events are
/// not silently dropped.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}
