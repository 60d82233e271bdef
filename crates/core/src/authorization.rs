//! Authorization flow: issuing authorization URLs and redeeming callbacks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokenbridge_domain::{
    AuditAction, AuditEvent, BrokerError, LinkedAccount, PendingAuthorization, ProviderConfig,
    Result,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::pkce::{self, PkcePair};
use crate::ports::{
    AccountStore, AuditSink, ConsumeError, CredentialCipher, ExchangeError, StateStore,
    TokenExchanger,
};

/// Everything a caller needs to send the user to the provider.
#[derive(Debug, Clone)]
pub struct AuthorizationStart {
    pub authorization_url: String,
    pub state: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successfully redeemed callback.
#[derive(Debug, Clone)]
pub struct ConnectionOutcome {
    pub account_id: Uuid,
    pub external_handle: String,
    pub redirect_url: Option<String>,
}

/// Connection state exposed to the dashboard; never contains token material.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub external_handle: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

/// Drives the front half of the protocol: PKCE generation, pending-state
/// bookkeeping, the code exchange on callback, and first-time persistence of
/// the linked account.
pub struct AuthorizationService {
    provider: ProviderConfig,
    states: Arc<dyn StateStore>,
    accounts: Arc<dyn AccountStore>,
    exchanger: Arc<dyn TokenExchanger>,
    cipher: Arc<dyn CredentialCipher>,
    audit: Arc<dyn AuditSink>,
}

impl AuthorizationService {
    #[must_use]
    pub fn new(
        provider: ProviderConfig,
        states: Arc<dyn StateStore>,
        accounts: Arc<dyn AccountStore>,
        exchanger: Arc<dyn TokenExchanger>,
        cipher: Arc<dyn CredentialCipher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { provider, states, accounts, exchanger, cipher, audit }
    }

    /// Start an authorization attempt: mint PKCE material and a one-time
    /// state, persist the pending record, and build the provider URL.
    ///
    /// # Errors
    /// `InvalidInput` for an unknown callback domain; `Database` if the
    /// pending record cannot be stored.
    pub async fn begin(
        &self,
        user_id: Uuid,
        domain: &str,
        redirect_after_auth: Option<String>,
        source_ip: Option<String>,
    ) -> Result<AuthorizationStart> {
        let callback_url = self.provider.callback_url(domain)?.to_owned();

        let pair = PkcePair::generate();
        let state_id = pkce::generate_state_id();
        let pending = PendingAuthorization::new(
            state_id,
            pair.code_verifier.clone(),
            user_id,
            domain.to_owned(),
            redirect_after_auth,
        );
        self.states.create(&pending).await?;

        let authorization_url = build_authorization_url(
            &self.provider.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", &self.provider.client_id),
                ("redirect_uri", &callback_url),
                ("scope", &self.provider.scope_string()),
                ("state", &pending.state_id),
                ("code_challenge", &pair.code_challenge),
                ("code_challenge_method", PkcePair::challenge_method()),
            ],
        );

        self.audit.record(
            AuditEvent::new(AuditAction::Initiated, Some(user_id))
                .with_source_ip(source_ip)
                .with_metadata(serde_json::json!({
                    "domain": domain,
                    "state_id": pending.state_id,
                })),
        );
        info!(user_id = %user_id, domain, "authorization flow initiated");

        Ok(AuthorizationStart {
            authorization_url,
            state: pending.state_id,
            expires_at: pending.expires_at,
        })
    }

    /// Redeem a provider callback: consume the state exactly once, exchange
    /// the code, fetch the external profile, encrypt and persist.
    ///
    /// Replayed, unknown, or expired states are rejected with
    /// [`BrokerError::CsrfDetected`] and leave account state untouched.
    pub async fn complete(
        &self,
        code: &str,
        state_id: &str,
        domain: &str,
        source_ip: Option<String>,
    ) -> Result<ConnectionOutcome> {
        let pending = match self.states.consume_once(state_id).await {
            Ok(pending) => pending,
            Err(err @ (ConsumeError::NotFound | ConsumeError::Expired)) => {
                self.record_rejected_callback(source_ip, &err.to_string());
                return Err(BrokerError::CsrfDetected(err.to_string()));
            }
            Err(ConsumeError::Backend(err)) => return Err(err),
        };

        if pending.domain != domain {
            self.record_rejected_callback(source_ip, "callback domain mismatch");
            return Err(BrokerError::CsrfDetected("callback domain mismatch".into()));
        }

        let callback_url = self.provider.callback_url(&pending.domain)?.to_owned();
        let tokens = self
            .exchanger
            .exchange_code(code, &pending.code_verifier, &callback_url)
            .await
            .map_err(map_connect_error)?;

        let profile =
            self.exchanger.fetch_profile(&tokens.access_token).await.map_err(map_connect_error)?;

        let now = Utc::now();
        let account = LinkedAccount {
            id: Uuid::new_v4(),
            owner_user_id: pending.requesting_user_id,
            external_account_id: profile.external_account_id,
            external_handle: profile.handle.clone(),
            display_name: profile.display_name,
            access_token_ciphertext: self.cipher.encrypt(tokens.access_token.as_bytes())?,
            refresh_token_ciphertext: tokens
                .refresh_token
                .as_deref()
                .map(|rt| self.cipher.encrypt(rt.as_bytes()))
                .transpose()?,
            granted_scopes: tokens.scopes,
            token_expires_at: tokens.expires_at,
            last_refreshed_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let account_id = self.accounts.upsert(&account).await?;

        self.audit.record(
            AuditEvent::new(AuditAction::Connected, Some(pending.requesting_user_id))
                .with_account(account_id)
                .with_source_ip(source_ip)
                .with_metadata(serde_json::json!({
                    "external_handle": profile.handle,
                    "scopes": account.granted_scopes,
                })),
        );
        info!(account_id = %account_id, handle = %profile.handle, "external account connected");

        Ok(ConnectionOutcome {
            account_id,
            external_handle: profile.handle,
            redirect_url: pending.redirect_target,
        })
    }

    /// Connection state for the dashboard's status widget.
    pub async fn connection_status(&self, owner_user_id: Uuid) -> Result<ConnectionStatus> {
        let account = self.accounts.get_for_use(owner_user_id).await?;
        Ok(match account {
            Some(account) if account.is_active => ConnectionStatus {
                connected: true,
                external_handle: Some(account.external_handle),
                token_expires_at: Some(account.token_expires_at),
                scopes: account.granted_scopes,
            },
            _ => ConnectionStatus {
                connected: false,
                external_handle: None,
                token_expires_at: None,
                scopes: Vec::new(),
            },
        })
    }

    fn record_rejected_callback(&self, source_ip: Option<String>, reason: &str) {
        warn!(reason, "callback rejected");
        self.audit.record(
            AuditEvent::new(AuditAction::Connected, None)
                .with_source_ip(source_ip)
                .with_metadata(serde_json::json!({
                    "success": false,
                    "reason": reason,
                })),
        );
    }
}

fn build_authorization_url(base: &str, params: &[(&str, &str)]) -> String {
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{base}?{query}")
}

/// Exchange failures during the connect flow, mapped for the boundary.
fn map_connect_error(err: ExchangeError) -> BrokerError {
    match err {
        ExchangeError::InvalidGrant => {
            BrokerError::ProviderDenied("authorization code rejected".into())
        }
        ExchangeError::Network(msg) | ExchangeError::ProviderUnavailable(msg) => {
            BrokerError::TemporarilyUnavailable(msg)
        }
        ExchangeError::Protocol(msg) => BrokerError::TemporarilyUnavailable(msg),
    }
}
