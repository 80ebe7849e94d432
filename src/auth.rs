use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

const SUPABASE_AUDIENCE: &str = "authenticated";

/// Identity asserted by a Supabase access token.
#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseUser {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SupabaseClaims {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<Value>,
}

pub async fn require_supabase_user(state: &AppState, headers: &HeaderMap) -> AppResult<SupabaseUser> {
    if let Some(user) = dev_override_user(state, headers) {
        return Ok(user);
    }

    let token = bearer_token(headers).ok_or_else(|| {
        AppError::Unauthorized("Unauthorized: missing bearer token.".to_string())
    })?;

    if let Some(secret) = state.config.supabase_jwt_secret.as_deref() {
        return verify_jwt(token, secret);
    }
    fetch_supabase_user(state, token).await
}

pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    Ok(require_supabase_user(state, headers).await?.id)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn dev_override_user(state: &AppState, headers: &HeaderMap) -> Option<SupabaseUser> {
    if !state.config.auth_dev_overrides_enabled() {
        return None;
    }
    let user_id = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())?;
    tracing::debug!(user_id, "Using dev auth override");
    Some(SupabaseUser {
        id: user_id.to_string(),
        email: Some(format!("{user_id}@dev.local")),
        user_metadata: None,
    })
}

fn verify_jwt(token: &str, secret: &str) -> AppResult<SupabaseUser> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[SUPABASE_AUDIENCE]);

    let data = decode::<SupabaseClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|error| {
        tracing::debug!(error = %error, "JWT validation failed");
        AppError::Unauthorized("Unauthorized: invalid or expired token.".to_string())
    })?;

    Ok(SupabaseUser {
        id: data.claims.sub,
        email: data.claims.email,
        user_metadata: data.claims.user_metadata,
    })
}

async fn fetch_supabase_user(state: &AppState, token: &str) -> AppResult<SupabaseUser> {
    let (Some(base_url), Some(service_key)) = (
        state.config.supabase_url.as_deref(),
        state.config.supabase_service_role_key.as_deref(),
    ) else {
        return Err(AppError::Dependency(
            "Supabase auth is not configured. Set SUPABASE_JWT_SECRET or SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY.".to_string(),
        ));
    };

    let endpoint = url::Url::parse(base_url)
        .and_then(|base| base.join("/auth/v1/user"))
        .map_err(|error| AppError::Internal(format!("Invalid SUPABASE_URL: {error}")))?;

    let response = state
        .http_client
        .get(endpoint)
        .header("apikey", service_key)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|error| AppError::Dependency(format!("Supabase auth request failed: {error}")))?;

    if response.status() == reqwest::StatusCode::UNAUTHORIZED
        || response.status() == reqwest::StatusCode::FORBIDDEN
    {
        return Err(AppError::Unauthorized(
            "Unauthorized: invalid or expired token.".to_string(),
        ));
    }
    let response = response
        .error_for_status()
        .map_err(|error| AppError::Dependency(format!("Supabase auth request failed: {error}")))?;

    response
        .json::<SupabaseUser>()
        .await
        .map_err(|error| AppError::Dependency(format!("Unexpected Supabase auth payload: {error}")))
}
