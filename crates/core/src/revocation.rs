//! Disconnecting a linked account.

use std::sync::Arc;

use tokenbridge_domain::{AuditAction, AuditEvent, BrokerError, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::ports::{AccountStore, AuditSink, CredentialCipher, TokenExchanger};

/// Revokes consent: best-effort invalidation at the provider, authoritative
/// deactivation locally. Local deactivation must succeed even when the
/// provider is unreachable, otherwise a user could never disconnect during
/// an outage.
pub struct RevocationService {
    accounts: Arc<dyn AccountStore>,
    exchanger: Arc<dyn TokenExchanger>,
    cipher: Arc<dyn CredentialCipher>,
    audit: Arc<dyn AuditSink>,
}

impl RevocationService {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        exchanger: Arc<dyn TokenExchanger>,
        cipher: Arc<dyn CredentialCipher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { accounts, exchanger, cipher, audit }
    }

    /// Disconnect `account_id`, which must belong to `owner_user_id`.
    ///
    /// # Errors
    /// [`BrokerError::NotFound`] when the account does not exist or belongs
    /// to another user; storage errors if the deactivation write fails.
    pub async fn revoke(
        &self,
        owner_user_id: Uuid,
        account_id: Uuid,
        source_ip: Option<String>,
    ) -> Result<()> {
        let account = self
            .accounts
            .get_by_id(account_id)
            .await?
            .filter(|a| a.owner_user_id == owner_user_id)
            .ok_or_else(|| BrokerError::NotFound("linked account not found".into()))?;

        let mut remote_revoked = false;
        match self.cipher.decrypt(&account.access_token_ciphertext) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(access_token) => match self.exchanger.revoke_token(&access_token).await {
                    Ok(()) => remote_revoked = true,
                    Err(err) => {
                        warn!(account_id = %account_id, error = %err, "provider-side revocation failed, deactivating locally");
                    }
                },
                Err(_) => {
                    warn!(account_id = %account_id, "stored access token is not valid UTF-8, skipping remote revocation");
                }
            },
            Err(err) => {
                warn!(account_id = %account_id, error = %err, "could not decrypt access token, skipping remote revocation");
            }
        }

        self.accounts.mark_inactive(account_id).await?;

        self.audit.record(
            AuditEvent::new(AuditAction::Revoked, Some(owner_user_id))
                .with_account(account_id)
                .with_source_ip(source_ip)
                .with_metadata(serde_json::json!({ "remote_revoked": remote_revoked })),
        );
        info!(account_id = %account_id, remote_revoked, "linked account disconnected");
        Ok(())
    }
}
