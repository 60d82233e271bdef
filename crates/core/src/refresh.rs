//! Refresh coordinator: the single gateway to usable access tokens.
//!
//! Per-account state machine:
//!
//! ```text
//! ACTIVE --(expires in < 5min or already expired)--> REFRESHING --(success)--> ACTIVE
//! REFRESHING --(invalid_grant)--> INACTIVE (re-authorization required)
//! REFRESHING --(network error)--> ACTIVE (stale token kept, caller retries later)
//! ```
//!
//! At most one refresh is in flight per account. Concurrent callers queue on
//! the account's lock and, once they acquire it, re-check freshness instead
//! of issuing a duplicate provider call. The refresh itself runs in a
//! spawned task so its outcome is persisted even when the original caller
//! has disconnected: the provider has already rotated the credentials by
//! then, and dropping the result would orphan them.

use std::sync::Arc;

use dashmap::DashMap;
use tokenbridge_domain::constants::REFRESH_THRESHOLD_SECONDS;
use tokenbridge_domain::{AuditAction, AuditEvent, BrokerError, LinkedAccount, Result};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ports::{
    AccountStore, AuditSink, CredentialCipher, CredentialUpdate, ExchangeError, TokenExchanger,
};

/// Shared handles the spawned refresh task needs.
#[derive(Clone)]
struct RefreshDeps {
    accounts: Arc<dyn AccountStore>,
    exchanger: Arc<dyn TokenExchanger>,
    cipher: Arc<dyn CredentialCipher>,
    audit: Arc<dyn AuditSink>,
    threshold_seconds: i64,
}

/// Serializes refreshes per account and hands out decrypted access tokens.
///
/// This is the only consumer-facing path to a credential: callers receive a
/// bare access token, never the refresh token and never the cipher.
pub struct RefreshCoordinator {
    deps: RefreshDeps,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        exchanger: Arc<dyn TokenExchanger>,
        cipher: Arc<dyn CredentialCipher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self::with_threshold(accounts, exchanger, cipher, audit, REFRESH_THRESHOLD_SECONDS)
    }

    #[must_use]
    pub fn with_threshold(
        accounts: Arc<dyn AccountStore>,
        exchanger: Arc<dyn TokenExchanger>,
        cipher: Arc<dyn CredentialCipher>,
        audit: Arc<dyn AuditSink>,
        threshold_seconds: i64,
    ) -> Self {
        Self {
            deps: RefreshDeps { accounts, exchanger, cipher, audit, threshold_seconds },
            locks: DashMap::new(),
        }
    }

    /// Return a valid access token for the user's linked account, refreshing
    /// proactively when less than the threshold of lifetime remains.
    ///
    /// # Errors
    /// - [`BrokerError::NotConnected`] when no account exists.
    /// - [`BrokerError::ReconnectRequired`] when the account was revoked or
    ///   the provider rejected the refresh token.
    /// - [`BrokerError::TemporarilyUnavailable`] on transient provider
    ///   failures; the stored (possibly stale) credential is left untouched.
    pub async fn ensure_fresh(&self, owner_user_id: Uuid) -> Result<String> {
        let account =
            self.deps.accounts.get_for_use(owner_user_id).await?.ok_or(BrokerError::NotConnected)?;
        if !account.is_active {
            return Err(BrokerError::ReconnectRequired("account disconnected".into()));
        }
        if !account.needs_refresh(self.deps.threshold_seconds) {
            return decrypt_access(self.deps.cipher.as_ref(), &account);
        }

        self.run_refresh(account.id, false).await
    }

    /// Manual refresh trigger (normally implicit via [`Self::ensure_fresh`]).
    /// The account must belong to `owner_user_id`.
    pub async fn refresh_account(&self, owner_user_id: Uuid, account_id: Uuid) -> Result<()> {
        let account = self
            .deps
            .accounts
            .get_by_id(account_id)
            .await?
            .filter(|a| a.owner_user_id == owner_user_id)
            .ok_or_else(|| BrokerError::NotFound("linked account not found".into()))?;
        if !account.is_active {
            return Err(BrokerError::ReconnectRequired("account disconnected".into()));
        }

        self.run_refresh(account.id, true).await.map(|_| ())
    }

    /// Run the locked refresh in its own task and await its outcome.
    ///
    /// Spawning decouples persistence from the caller: if the caller is
    /// cancelled mid-await, the task still completes and writes the rotated
    /// credentials.
    async fn run_refresh(&self, account_id: Uuid, force: bool) -> Result<String> {
        let lock = self
            .locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let deps = self.deps.clone();

        let outcome = tokio::spawn(refresh_locked(deps, lock, account_id, force))
            .await
            .map_err(|err| BrokerError::Internal(format!("refresh task failed: {err}")))?;

        // The map only holds locks for refreshes in flight: once the last
        // queued caller is done (only the map's Arc remains), the entry goes.
        self.locks.remove_if(&account_id, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }
}

async fn refresh_locked(
    deps: RefreshDeps,
    lock: Arc<Mutex<()>>,
    account_id: Uuid,
    force: bool,
) -> Result<String> {
    let _guard = lock.lock().await;

    // Re-read under the lock: a queued caller may find the account already
    // refreshed (or revoked) by whoever held the lock before it.
    let account = deps
        .accounts
        .get_by_id(account_id)
        .await?
        .ok_or_else(|| BrokerError::NotFound("linked account not found".into()))?;
    if !account.is_active {
        return Err(BrokerError::ReconnectRequired("account disconnected".into()));
    }
    if !force && !account.needs_refresh(deps.threshold_seconds) {
        return decrypt_access(deps.cipher.as_ref(), &account);
    }

    let Some(refresh_ciphertext) = account.refresh_token_ciphertext.as_ref() else {
        return Err(BrokerError::ReconnectRequired("no refresh token on record".into()));
    };
    let refresh_token = decrypt_string(deps.cipher.as_ref(), refresh_ciphertext)?;

    match deps.exchanger.exchange_refresh_token(&refresh_token).await {
        Ok(tokens) => {
            let update = CredentialUpdate {
                access_token_ciphertext: deps.cipher.encrypt(tokens.access_token.as_bytes())?,
                // A rotated refresh token replaces the stored one; when the
                // provider omits it, the old ciphertext stays valid.
                refresh_token_ciphertext: tokens
                    .refresh_token
                    .as_deref()
                    .map(|rt| deps.cipher.encrypt(rt.as_bytes()))
                    .transpose()?,
                token_expires_at: tokens.expires_at,
                refreshed_at: chrono::Utc::now(),
            };
            deps.accounts.update_tokens(account_id, &update).await?;

            deps.audit.record(
                AuditEvent::new(AuditAction::Refreshed, None).with_account(account_id).with_metadata(
                    serde_json::json!({
                        "rotated_refresh_token": tokens.refresh_token.is_some(),
                    }),
                ),
            );
            info!(account_id = %account_id, "access token refreshed");
            Ok(tokens.access_token)
        }
        Err(ExchangeError::InvalidGrant) => {
            // Terminal: the stored refresh token is dead (revoked consent, or
            // a rotated-out token was replayed). Force re-authorization.
            deps.accounts.mark_inactive(account_id).await?;
            deps.audit.record(
                AuditEvent::new(AuditAction::RefreshFailed, None)
                    .with_account(account_id)
                    .with_metadata(serde_json::json!({ "reason": "invalid_grant" })),
            );
            warn!(account_id = %account_id, "refresh token rejected; account requires re-authorization");
            Err(BrokerError::ReconnectRequired("provider rejected the refresh token".into()))
        }
        Err(err) => {
            // Transient: keep the stale credential and tell the caller to
            // retry later.
            deps.audit.record(
                AuditEvent::new(AuditAction::RefreshFailed, None)
                    .with_account(account_id)
                    .with_metadata(serde_json::json!({ "reason": "transient", "transient": err.is_transient() })),
            );
            error!(account_id = %account_id, error = %err, "token refresh failed transiently");
            Err(BrokerError::TemporarilyUnavailable(err.to_string()))
        }
    }
}

fn decrypt_access(cipher: &dyn CredentialCipher, account: &LinkedAccount) -> Result<String> {
    decrypt_string(cipher, &account.access_token_ciphertext)
}

fn decrypt_string(
    cipher: &dyn CredentialCipher,
    data: &tokenbridge_domain::EncryptedData,
) -> Result<String> {
    let bytes = cipher.decrypt(data)?;
    String::from_utf8(bytes)
        .map_err(|_| BrokerError::Security("decrypted credential is not valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokenbridge_domain::TokenSet;

    use super::*;
    use crate::testing::{
        account_fixture, MockAccountStore, MockExchanger, PlainCipher, RecordingAuditSink,
    };

    fn coordinator(
        accounts: Arc<MockAccountStore>,
        exchanger: Arc<MockExchanger>,
        audit: Arc<RecordingAuditSink>,
    ) -> RefreshCoordinator {
        RefreshCoordinator::new(accounts, exchanger, Arc::new(PlainCipher), audit)
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_provider_call() {
        let accounts = Arc::new(MockAccountStore::default());
        let exchanger = Arc::new(MockExchanger::default());
        let owner = Uuid::new_v4();
        accounts.insert(account_fixture(owner, 3600));

        let coordinator =
            coordinator(accounts, exchanger.clone(), Arc::new(RecordingAuditSink::default()));
        let token = coordinator.ensure_fresh(owner).await.unwrap();

        assert_eq!(token, "stored-access");
        assert_eq!(exchanger.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn near_expiry_triggers_proactive_refresh() {
        let accounts = Arc::new(MockAccountStore::default());
        let exchanger = Arc::new(MockExchanger::default());
        exchanger.set_next_tokens(TokenSet::new(
            "new-access".into(),
            Some("new-refresh".into()),
            vec![],
            7200,
        ));
        let owner = Uuid::new_v4();
        let account = account_fixture(owner, 120); // 2 minutes left
        let account_id = account.id;
        accounts.insert(account);

        let coordinator =
            coordinator(accounts.clone(), exchanger.clone(), Arc::new(RecordingAuditSink::default()));
        let token = coordinator.ensure_fresh(owner).await.unwrap();

        assert_eq!(token, "new-access");
        assert_eq!(exchanger.refresh_calls(), 1);

        let stored = accounts.get_by_id(account_id).await.unwrap().unwrap();
        // New expiry is well past the threshold and the rotated refresh
        // token replaced the old one.
        assert!(stored.seconds_until_expiry() > 300);
        assert_eq!(
            stored.refresh_token_ciphertext.unwrap().ciphertext,
            b"new-refresh".to_vec()
        );
        assert!(stored.last_refreshed_at.is_some());
    }

    #[tokio::test]
    async fn unrotated_refresh_token_is_kept() {
        let accounts = Arc::new(MockAccountStore::default());
        let exchanger = Arc::new(MockExchanger::default());
        exchanger.set_next_tokens(TokenSet::new("new-access".into(), None, vec![], 7200));
        let owner = Uuid::new_v4();
        let account = account_fixture(owner, 60);
        let account_id = account.id;
        accounts.insert(account);

        let coordinator =
            coordinator(accounts.clone(), exchanger, Arc::new(RecordingAuditSink::default()));
        coordinator.ensure_fresh(owner).await.unwrap();

        let stored = accounts.get_by_id(account_id).await.unwrap().unwrap();
        assert_eq!(
            stored.refresh_token_ciphertext.unwrap().ciphertext,
            b"stored-refresh".to_vec()
        );
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let accounts = Arc::new(MockAccountStore::default());
        let exchanger = Arc::new(MockExchanger::default());
        exchanger.set_next_tokens(TokenSet::new("new-access".into(), None, vec![], 7200));
        exchanger.set_refresh_latency(Duration::from_millis(50));
        let owner = Uuid::new_v4();
        accounts.insert(account_fixture(owner, 60));

        let coordinator = Arc::new(coordinator(
            accounts,
            exchanger.clone(),
            Arc::new(RecordingAuditSink::default()),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move { coordinator.ensure_fresh(owner).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "new-access");
        }

        assert_eq!(exchanger.refresh_calls(), 1, "refresh storm: duplicate provider calls");
        assert!(coordinator.locks.is_empty());
    }

    #[tokio::test]
    async fn lock_map_does_not_accumulate_entries() {
        let accounts = Arc::new(MockAccountStore::default());
        let exchanger = Arc::new(MockExchanger::default());
        exchanger.set_next_tokens(TokenSet::new("new-access".into(), None, vec![], 7200));
        let owner = Uuid::new_v4();
        accounts.insert(account_fixture(owner, 60));

        let coordinator =
            coordinator(accounts, exchanger, Arc::new(RecordingAuditSink::default()));
        coordinator.ensure_fresh(owner).await.unwrap();

        assert!(coordinator.locks.is_empty());
    }

    #[tokio::test]
    async fn invalid_grant_marks_account_inactive() {
        let accounts = Arc::new(MockAccountStore::default());
        let exchanger = Arc::new(MockExchanger::default());
        exchanger.fail_refreshes_with(|| ExchangeError::InvalidGrant);
        let owner = Uuid::new_v4();
        let account = account_fixture(owner, 60);
        let account_id = account.id;
        accounts.insert(account);

        let audit = Arc::new(RecordingAuditSink::default());
        let coordinator = coordinator(accounts.clone(), exchanger, audit.clone());

        let result = coordinator.ensure_fresh(owner).await;
        assert!(matches!(result, Err(BrokerError::ReconnectRequired(_))));

        let stored = accounts.get_by_id(account_id).await.unwrap().unwrap();
        assert!(!stored.is_active);

        // Follow-up calls get the terminal error immediately, no retry loop.
        let again = coordinator.ensure_fresh(owner).await;
        assert!(matches!(again, Err(BrokerError::ReconnectRequired(_))));
        assert!(audit.events().iter().any(|e| e.action == AuditAction::RefreshFailed));
    }

    #[tokio::test]
    async fn transient_failure_keeps_stale_token() {
        let accounts = Arc::new(MockAccountStore::default());
        let exchanger = Arc::new(MockExchanger::default());
        exchanger.fail_refreshes_with(|| ExchangeError::Network("connection reset".into()));
        let owner = Uuid::new_v4();
        let account = account_fixture(owner, 60);
        let account_id = account.id;
        accounts.insert(account);

        let coordinator =
            coordinator(accounts.clone(), exchanger, Arc::new(RecordingAuditSink::default()));

        let result = coordinator.ensure_fresh(owner).await;
        assert!(matches!(result, Err(BrokerError::TemporarilyUnavailable(_))));

        let stored = accounts.get_by_id(account_id).await.unwrap().unwrap();
        assert!(stored.is_active);
        assert_eq!(stored.access_token_ciphertext.ciphertext, b"stored-access".to_vec());
    }

    #[tokio::test]
    async fn missing_account_is_not_connected() {
        let coordinator = coordinator(
            Arc::new(MockAccountStore::default()),
            Arc::new(MockExchanger::default()),
            Arc::new(RecordingAuditSink::default()),
        );
        let result = coordinator.ensure_fresh(Uuid::new_v4()).await;
        assert!(matches!(result, Err(BrokerError::NotConnected)));
    }

    #[tokio::test]
    async fn manual_refresh_rejects_foreign_account() {
        let accounts = Arc::new(MockAccountStore::default());
        let owner = Uuid::new_v4();
        let account = account_fixture(owner, 3600);
        let account_id = account.id;
        accounts.insert(account);

        let coordinator = coordinator(
            accounts,
            Arc::new(MockExchanger::default()),
            Arc::new(RecordingAuditSink::default()),
        );

        let result = coordinator.refresh_account(Uuid::new_v4(), account_id).await;
        assert!(matches!(result, Err(BrokerError::NotFound(_))));
    }

    #[tokio::test]
    async fn manual_refresh_forces_even_when_fresh() {
        let accounts = Arc::new(MockAccountStore::default());
        let exchanger = Arc::new(MockExchanger::default());
        exchanger.set_next_tokens(TokenSet::new("forced".into(), None, vec![], 7200));
        let owner = Uuid::new_v4();
        let account = account_fixture(owner, 3600);
        let account_id = account.id;
        accounts.insert(account);

        let coordinator =
            coordinator(accounts, exchanger.clone(), Arc::new(RecordingAuditSink::default()));
        coordinator.refresh_account(owner, account_id).await.unwrap();
        assert_eq!(exchanger.refresh_calls(), 1);
    }
}
