//! HTTP surface: `/auth/{provider}/…`.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{ApiError, ErrorCode};
use crate::extract::{source_ip, UserId};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/auth/{provider}/login", get(login))
        .route("/auth/{provider}/callback", get(callback))
        .route("/auth/{provider}/status", get(status))
        .route("/auth/{provider}/revoke", post(revoke))
        .route("/auth/{provider}/refresh/{account_id}", post(refresh))
        .route("/auth/{provider}/health", get(health))
        .with_state(state)
}

/// Single-provider deployment: any other provider segment is a 404, not a
/// hint about what is configured.
fn check_provider(state: &AppState, provider: &str) -> Result<(), ApiError> {
    if provider == state.provider_name {
        Ok(())
    } else {
        Err(ApiError::not_found())
    }
}

#[derive(Deserialize)]
struct LoginParams {
    domain: String,
    redirect_after_auth: Option<String>,
}

#[derive(Serialize)]
struct LoginResponse {
    authorization_url: String,
    state: String,
    expires_at: DateTime<Utc>,
}

async fn login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    UserId(user_id): UserId,
    Query(params): Query<LoginParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    check_provider(&state, &provider)?;

    let start = state
        .authorization
        .begin(user_id, &params.domain, params.redirect_after_auth, source_ip(&headers))
        .await?;

    Ok(Json(LoginResponse {
        authorization_url: start.authorization_url,
        state: start.state,
        expires_at: start.expires_at,
    }))
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    domain: String,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
struct CallbackResponse {
    success: bool,
    account_id: Uuid,
    external_handle: String,
    redirect_url: Option<String>,
}

async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    check_provider(&state, &provider)?;

    // The provider reports user denial (or its own errors) via query params
    // instead of a code. Short-circuit before touching the state store; the
    // pending record ages out on its own.
    if let Some(error) = params.error {
        let detail = params.error_description.unwrap_or(error);
        warn!(detail, "provider returned an error on callback");
        return Err(ApiError::new(ErrorCode::ProviderDenied, detail));
    }

    let code = params.code.ok_or_else(|| ApiError::invalid_request("missing code parameter"))?;
    let state_id =
        params.state.ok_or_else(|| ApiError::invalid_request("missing state parameter"))?;

    let outcome = state
        .authorization
        .complete(&code, &state_id, &params.domain, source_ip(&headers))
        .await?;

    Ok(Json(CallbackResponse {
        success: true,
        account_id: outcome.account_id,
        external_handle: outcome.external_handle,
        redirect_url: outcome.redirect_url,
    }))
}

#[derive(Serialize)]
struct StatusResponse {
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    scopes: Vec<String>,
}

async fn status(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    UserId(user_id): UserId,
) -> Result<impl IntoResponse, ApiError> {
    check_provider(&state, &provider)?;

    let status = state.authorization.connection_status(user_id).await?;
    Ok(Json(StatusResponse {
        connected: status.connected,
        external_handle: status.external_handle,
        token_expires_at: status.token_expires_at,
        scopes: status.scopes,
    }))
}

#[derive(Deserialize)]
struct RevokeRequest {
    account_id: Uuid,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

async fn revoke(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    UserId(user_id): UserId,
    headers: HeaderMap,
    Json(request): Json<RevokeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_provider(&state, &provider)?;

    state.revocation.revoke(user_id, request.account_id, source_ip(&headers)).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn refresh(
    State(state): State<AppState>,
    Path((provider, account_id)): Path<(String, Uuid)>,
    UserId(user_id): UserId,
) -> Result<impl IntoResponse, ApiError> {
    check_provider(&state, &provider)?;

    state.refresh.refresh_account(user_id, account_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn health(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    check_provider(&state, &provider)?;

    state.db.health_check()?;
    Ok(Json(HealthResponse {
        status: "ok",
        service: "tokenbridge",
        version: env!("CARGO_PKG_VERSION"),
    }))
}
