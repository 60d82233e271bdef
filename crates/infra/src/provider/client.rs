//! Token-endpoint client with bounded retry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokenbridge_core::ports::{ExchangeError, TokenExchanger};
use tokenbridge_domain::{
    ExternalProfile, HttpConfig, ProfileEndpointResponse, ProviderConfig, TokenEndpointResponse,
    TokenSet,
};
use tracing::debug;

/// RFC 6749 §5.2 error body.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

/// Talks to the provider's authorize/token/revoke/profile endpoints.
///
/// Retry policy: 5xx responses and connection-level failures are retried
/// with exponential backoff up to the configured attempt budget; 4xx
/// responses are never retried, the provider has already made up its mind.
pub struct ProviderHttpClient {
    client: ReqwestClient,
    provider: ProviderConfig,
    max_attempts: usize,
    base_backoff: Duration,
}

impl ProviderHttpClient {
    pub fn new(provider: ProviderConfig, http: &HttpConfig) -> Result<Self, ExchangeError> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(http.timeout_seconds))
            .build()
            .map_err(|err| ExchangeError::Network(err.to_string()))?;

        Ok(Self {
            client,
            provider,
            max_attempts: http.max_attempts.max(1),
            base_backoff: Duration::from_millis(http.base_backoff_ms),
        })
    }

    /// Execute with retry on transient failures. The request must carry a
    /// cloneable (buffered) body.
    async fn send_with_retry(&self, builder: RequestBuilder) -> Result<Response, ExchangeError> {
        let attempts = self.max_attempts;
        let mut last_failure = None;

        for attempt in 0..attempts {
            let request = builder
                .try_clone()
                .ok_or_else(|| ExchangeError::Protocol("request body cannot be cloned".into()))?;

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt = attempt + 1, %status, "provider response");
                    if status.is_server_error() && attempt + 1 < attempts {
                        last_failure = Some(ExchangeError::ProviderUnavailable(status.to_string()));
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    debug!(attempt = attempt + 1, error = %err, "provider request failed");
                    if attempt + 1 < attempts && is_retryable(&err) {
                        last_failure = Some(ExchangeError::Network(err.to_string()));
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }
                    return Err(ExchangeError::Network(err.to_string()));
                }
            }
        }

        Err(last_failure
            .unwrap_or_else(|| ExchangeError::Network("retry budget exhausted".into())))
    }

    async fn sleep_with_backoff(&self, retry_number: usize) {
        let shift = retry_number.saturating_sub(1).min(8) as u32;
        let delay = self.base_backoff.saturating_mul(1 << shift);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
    ) -> Result<TokenSet, ExchangeError> {
        let builder = self
            .client
            .post(&self.provider.token_url)
            .basic_auth(&self.provider.client_id, Some(&self.provider.client_secret))
            .form(form);

        let response = self.send_with_retry(builder).await?;
        let status = response.status();
        let body = response.bytes().await.map_err(|err| ExchangeError::Network(err.to_string()))?;

        if status.is_success() {
            let parsed: TokenEndpointResponse = serde_json::from_slice(&body)
                .map_err(|err| ExchangeError::Protocol(format!("malformed token response: {err}")))?;
            return Ok(parsed.into());
        }
        Err(classify_failure(status, &body))
    }
}

#[async_trait]
impl TokenExchanger for ProviderHttpClient {
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, ExchangeError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
            ("client_id", &self.provider.client_id),
        ])
        .await
    }

    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenSet, ExchangeError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.provider.client_id),
        ])
        .await
    }

    async fn revoke_token(&self, access_token: &str) -> Result<(), ExchangeError> {
        let builder = self
            .client
            .post(&self.provider.revoke_url)
            .basic_auth(&self.provider.client_id, Some(&self.provider.client_secret))
            .form(&[("token", access_token), ("token_type_hint", "access_token")]);

        let response = self.send_with_retry(builder).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.bytes().await.map_err(|err| ExchangeError::Network(err.to_string()))?;
        Err(classify_failure(status, &body))
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ExternalProfile, ExchangeError> {
        let builder = self.client.get(&self.provider.profile_url).bearer_auth(access_token);

        let response = self.send_with_retry(builder).await?;
        let status = response.status();
        let body = response.bytes().await.map_err(|err| ExchangeError::Network(err.to_string()))?;

        if status.is_success() {
            let parsed: ProfileEndpointResponse = serde_json::from_slice(&body).map_err(|err| {
                ExchangeError::Protocol(format!("malformed profile response: {err}"))
            })?;
            return Ok(parsed.into());
        }
        Err(classify_failure(status, &body))
    }
}

fn classify_failure(status: StatusCode, body: &[u8]) -> ExchangeError {
    if status.is_server_error() {
        return ExchangeError::ProviderUnavailable(status.to_string());
    }

    if let Ok(parsed) = serde_json::from_slice::<OAuthErrorBody>(body) {
        if parsed.error == "invalid_grant" {
            return ExchangeError::InvalidGrant;
        }
        let detail = parsed.error_description.unwrap_or(parsed.error);
        return ExchangeError::Protocol(format!("{status}: {detail}"));
    }
    ExchangeError::Protocol(status.to_string())
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
