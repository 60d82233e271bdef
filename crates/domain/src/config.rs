//! Application configuration structs.
//!
//! Populated once at startup by `tokenbridge_infra::config::loader` from
//! environment variables or a config file. Secrets (provider client
//! credentials, the credential encryption key) are configuration inputs to
//! the broker, not data it manages.

use std::collections::HashMap;

use serde::Deserialize;

use crate::errors::{BrokerError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

/// OAuth settings for the single supported identity provider.
#[derive(Clone, Deserialize)]
pub struct ProviderConfig {
    /// Path segment the HTTP surface answers under (`/auth/{name}/…`).
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub profile_url: String,
    pub scopes: Vec<String>,
    /// Deployment domain → callback URL registered with the provider.
    pub callback_urls: HashMap<String, String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    /// Twitter/X OAuth 2.0 settings with standard endpoints.
    #[must_use]
    pub fn twitter(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            name: "twitter".to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorize_url: "https://twitter.com/i/oauth2/authorize".to_string(),
            token_url: "https://api.twitter.com/2/oauth2/token".to_string(),
            revoke_url: "https://api.twitter.com/2/oauth2/revoke".to_string(),
            profile_url: "https://api.twitter.com/2/users/me".to_string(),
            scopes: vec![
                "tweet.read".to_string(),
                "tweet.write".to_string(),
                "users.read".to_string(),
                "follows.read".to_string(),
                "offline.access".to_string(),
            ],
            callback_urls: HashMap::new(),
        }
    }

    /// Scopes as the space-separated string OAuth 2.0 expects.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    /// Callback URL registered for a deployment domain.
    ///
    /// # Errors
    /// Returns `BrokerError::InvalidInput` for unknown domains.
    pub fn callback_url(&self, domain: &str) -> Result<&str> {
        self.callback_urls
            .get(domain)
            .map(String::as_str)
            .ok_or_else(|| BrokerError::InvalidInput(format!("unknown callback domain: {domain}")))
    }
}

/// Key material for credential encryption at rest.
#[derive(Clone, Deserialize)]
pub struct SecurityConfig {
    /// Base64-encoded 32-byte AES-256-GCM key, sourced from the deployment's
    /// secret store.
    pub credential_key: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig").field("credential_key", &"[REDACTED]").finish()
    }
}

/// Outbound HTTP behaviour for provider calls.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_backoff_ms")]
    pub base_backoff_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_pool_size() -> u32 {
    4
}

fn default_bind_addr() -> String {
    "127.0.0.1:8700".to_string()
}

fn default_timeout_seconds() -> u64 {
    crate::constants::PROVIDER_TIMEOUT_SECONDS
}

fn default_max_attempts() -> usize {
    crate::constants::PROVIDER_MAX_ATTEMPTS
}

fn default_backoff_ms() -> u64 {
    500
}
