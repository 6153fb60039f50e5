//! OAuth2 HTTP handlers
//!
//! Thin wrappers over `ReconciliationEngine`: extract parameters, run the
//! flow under a child of the shutdown token, shape the JSON response.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use idlink_core::models::identity::AuthIdentity;

use super::{AppError, AppResult, AppState};

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<String>,
}

/// OAuth2 authorization request query params
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub redirect_uri: Option<String>,
}

/// OAuth2 authorization URL response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub url: String,
    pub state: String,
}

/// Query string the provider redirects back with
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub user: AuthIdentity,
    pub access_token: String,
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: Option<u64>,
}

/// List configured providers
///
/// GET /api/oauth/providers
pub async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: state.engine.providers(),
    })
}

/// Get OAuth2 authorization URL
///
/// GET /api/oauth/{provider}/login?redirect_uri=<url>
pub async fn login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<LoginQuery>,
) -> AppResult<Json<LoginResponse>> {
    let redirect = state
        .engine
        .login_url(&provider, params.redirect_uri.as_deref())
        .await?;

    Ok(Json(LoginResponse {
        url: redirect.url,
        state: redirect.state,
    }))
}

/// OAuth2 callback handler
///
/// GET /api/oauth/{provider}/callback?code=xxx&state=xxx
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackQuery>,
) -> AppResult<Json<CallbackResponse>> {
    // The user denied consent or the provider refused the request
    if let Some(error) = params.error {
        warn!(provider = %provider, error = %error, "Provider returned an authorization error");
        let message = match params.error_description {
            Some(description) => format!("Authorization failed: {error}: {description}"),
            None => format!("Authorization failed: {error}"),
        };
        return Err(AppError::bad_request(message));
    }

    let cancel = state.shutdown.child_token();
    let outcome = state
        .engine
        .handle_callback(&provider, params.code.as_deref(), params.state.as_deref(), &cancel)
        .await?;

    Ok(Json(CallbackResponse {
        user: outcome.identity,
        access_token: outcome.access_token,
        expires_in: outcome.expires_in,
        redirect_url: outcome.redirect_url,
    }))
}

/// Trade a refresh token for a new access token
///
/// POST /api/oauth/token/refresh
/// Body: { "refresh_token": "xxx", "provider": "google" }
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Json<RefreshResponse>> {
    let cancel = state.shutdown.child_token();
    let refreshed = state
        .engine
        .refresh_access_token(&req.refresh_token, &req.provider, &cancel)
        .await?;

    Ok(Json(RefreshResponse {
        access_token: refreshed.access_token,
        expires_in: refreshed.expires_in,
    }))
}
