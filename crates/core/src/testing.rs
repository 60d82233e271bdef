//! In-memory port doubles shared by the service tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokenbridge_domain::{
    AuditEvent, EncryptedData, ExternalProfile, LinkedAccount, PendingAuthorization,
    ProviderConfig, Result, TokenSet,
};
use uuid::Uuid;

use crate::ports::{
    AccountStore, AuditSink, ConsumeError, CredentialCipher, CredentialUpdate, ExchangeError,
    StateStore, TokenExchanger,
};

pub fn provider_fixture() -> ProviderConfig {
    let mut provider = ProviderConfig::twitter("client-id", "client-secret");
    provider
        .callback_urls
        .insert("api".into(), "https://api.example.net/auth/callback".into());
    provider.authorize_url = "https://provider.test/authorize".into();
    provider.token_url = "https://provider.test/token".into();
    provider.revoke_url = "https://provider.test/revoke".into();
    provider.profile_url = "https://provider.test/me".into();
    provider
}

/// Active account whose plaintext credentials (under [`PlainCipher`]) are
/// `stored-access` / `stored-refresh`, expiring in `expires_in_seconds`.
pub fn account_fixture(owner_user_id: Uuid, expires_in_seconds: i64) -> LinkedAccount {
    let now = Utc::now();
    LinkedAccount {
        id: Uuid::new_v4(),
        owner_user_id,
        external_account_id: "12345".into(),
        external_handle: "someone".into(),
        display_name: Some("Someone".into()),
        access_token_ciphertext: plain(b"stored-access"),
        refresh_token_ciphertext: Some(plain(b"stored-refresh")),
        granted_scopes: vec!["tweet.read".into(), "offline.access".into()],
        token_expires_at: now + chrono::Duration::seconds(expires_in_seconds),
        last_refreshed_at: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn plain(bytes: &[u8]) -> EncryptedData {
    EncryptedData { nonce: Vec::new(), ciphertext: bytes.to_vec(), algorithm: "PLAIN".into() }
}

/// Identity cipher: ciphertext equals plaintext.
pub struct PlainCipher;

impl CredentialCipher for PlainCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedData> {
        Ok(plain(plaintext))
    }

    fn decrypt(&self, data: &EncryptedData) -> Result<Vec<u8>> {
        Ok(data.ciphertext.clone())
    }
}

#[derive(Default)]
pub struct MockStateStore {
    records: Mutex<HashMap<String, PendingAuthorization>>,
}

impl MockStateStore {
    pub fn peek(&self, state_id: &str) -> Option<PendingAuthorization> {
        self.records.lock().unwrap().get(state_id).cloned()
    }

    /// Shift a stored record's lifetime into the past.
    pub fn backdate(&self, state_id: &str, by: chrono::Duration) {
        let mut records = self.records.lock().unwrap();
        if let Some(pending) = records.get_mut(state_id) {
            pending.created_at -= by;
            pending.expires_at -= by;
        }
    }
}

#[async_trait]
impl StateStore for MockStateStore {
    async fn create(&self, pending: &PendingAuthorization) -> Result<()> {
        self.records.lock().unwrap().insert(pending.state_id.clone(), pending.clone());
        Ok(())
    }

    async fn consume_once(
        &self,
        state_id: &str,
    ) -> std::result::Result<PendingAuthorization, ConsumeError> {
        let removed = self.records.lock().unwrap().remove(state_id);
        match removed {
            None => Err(ConsumeError::NotFound),
            Some(pending) if pending.is_expired_at(Utc::now()) => Err(ConsumeError::Expired),
            Some(pending) => Ok(pending),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, pending| !pending.is_expired_at(now));
        Ok(before - records.len())
    }
}

#[derive(Default)]
pub struct MockAccountStore {
    accounts: Mutex<HashMap<Uuid, LinkedAccount>>,
    upserts: AtomicUsize,
}

impl MockAccountStore {
    pub fn insert(&self, account: LinkedAccount) {
        self.accounts.lock().unwrap().insert(account.id, account);
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountStore for MockAccountStore {
    async fn upsert(&self, account: &LinkedAccount) -> Result<Uuid> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut accounts = self.accounts.lock().unwrap();
        let existing_id = accounts
            .values()
            .find(|a| {
                a.owner_user_id == account.owner_user_id
                    && a.external_account_id == account.external_account_id
            })
            .map(|a| a.id);
        let id = existing_id.unwrap_or(account.id);
        let mut stored = account.clone();
        stored.id = id;
        accounts.insert(id, stored);
        Ok(id)
    }

    async fn get_for_use(&self, owner_user_id: Uuid) -> Result<Option<LinkedAccount>> {
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts
            .values()
            .filter(|a| a.owner_user_id == owner_user_id)
            .max_by_key(|a| a.updated_at)
            .cloned())
    }

    async fn get_by_id(&self, account_id: Uuid) -> Result<Option<LinkedAccount>> {
        Ok(self.accounts.lock().unwrap().get(&account_id).cloned())
    }

    async fn update_tokens(&self, account_id: Uuid, update: &CredentialUpdate) -> Result<()> {
        let mut accounts = self.accounts.lock().unwrap();
        if let Some(account) = accounts.get_mut(&account_id) {
            account.access_token_ciphertext = update.access_token_ciphertext.clone();
            if let Some(refresh) = &update.refresh_token_ciphertext {
                account.refresh_token_ciphertext = Some(refresh.clone());
            }
            account.token_expires_at = update.token_expires_at;
            account.last_refreshed_at = Some(update.refreshed_at);
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_inactive(&self, account_id: Uuid) -> Result<()> {
        let mut accounts = self.accounts.lock().unwrap();
        if let Some(account) = accounts.get_mut(&account_id) {
            account.is_active = false;
            account.updated_at = Utc::now();
        }
        Ok(())
    }
}

type FailureFactory = Box<dyn Fn() -> ExchangeError + Send + Sync>;

#[derive(Default)]
pub struct MockExchanger {
    next_tokens: Mutex<Option<TokenSet>>,
    exchange_failure: Mutex<Option<FailureFactory>>,
    refresh_failure: Mutex<Option<FailureFactory>>,
    revoke_failure: Mutex<Option<FailureFactory>>,
    refresh_latency: Mutex<Option<Duration>>,
    exchanges: AtomicUsize,
    refreshes: AtomicUsize,
    revokes: AtomicUsize,
}

impl MockExchanger {
    pub fn set_next_tokens(&self, tokens: TokenSet) {
        *self.next_tokens.lock().unwrap() = Some(tokens);
    }

    pub fn fail_exchanges_with(&self, factory: impl Fn() -> ExchangeError + Send + Sync + 'static) {
        *self.exchange_failure.lock().unwrap() = Some(Box::new(factory));
    }

    pub fn fail_refreshes_with(&self, factory: impl Fn() -> ExchangeError + Send + Sync + 'static) {
        *self.refresh_failure.lock().unwrap() = Some(Box::new(factory));
    }

    pub fn fail_revokes_with(&self, factory: impl Fn() -> ExchangeError + Send + Sync + 'static) {
        *self.revoke_failure.lock().unwrap() = Some(Box::new(factory));
    }

    pub fn set_refresh_latency(&self, latency: Duration) {
        *self.refresh_latency.lock().unwrap() = Some(latency);
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn revoke_calls(&self) -> usize {
        self.revokes.load(Ordering::SeqCst)
    }

    fn tokens(&self) -> TokenSet {
        self.next_tokens.lock().unwrap().clone().unwrap_or_else(|| {
            TokenSet::new(
                "access-token".into(),
                Some("refresh-token".into()),
                vec!["tweet.read".into(), "offline.access".into()],
                7200,
            )
        })
    }
}

#[async_trait]
impl TokenExchanger for MockExchanger {
    async fn exchange_code(
        &self,
        _code: &str,
        _code_verifier: &str,
        _redirect_uri: &str,
    ) -> std::result::Result<TokenSet, ExchangeError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if let Some(factory) = self.exchange_failure.lock().unwrap().as_ref() {
            return Err(factory());
        }
        Ok(self.tokens())
    }

    async fn exchange_refresh_token(
        &self,
        _refresh_token: &str,
    ) -> std::result::Result<TokenSet, ExchangeError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let latency = *self.refresh_latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(factory) = self.refresh_failure.lock().unwrap().as_ref() {
            return Err(factory());
        }
        Ok(self.tokens())
    }

    async fn revoke_token(&self, _access_token: &str) -> std::result::Result<(), ExchangeError> {
        self.revokes.fetch_add(1, Ordering::SeqCst);
        if let Some(factory) = self.revoke_failure.lock().unwrap().as_ref() {
            return Err(factory());
        }
        Ok(())
    }

    async fn fetch_profile(
        &self,
        _access_token: &str,
    ) -> std::result::Result<ExternalProfile, ExchangeError> {
        Ok(ExternalProfile {
            external_account_id: "12345".into(),
            handle: "someone".into(),
            display_name: Some("Someone".into()),
        })
    }
}

#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}
