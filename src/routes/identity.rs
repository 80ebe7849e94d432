use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use crate::{
    access::{end_session, require_viewer},
    auth::require_user_id,
    error::AppResult,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/me", axum::routing::get(me))
        .route("/session/sign-out", axum::routing::post(sign_out))
}

/// Pending and rejected clients may call this; the dashboard uses `active`
/// to pick between the app and the waiting screen.
async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let viewer = require_viewer(&state, &headers).await?;
    let active = viewer.ensure_active().is_ok();
    Ok(Json(json!({
        "data": viewer,
        "active": active,
    })))
}

async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    end_session(&state, &user_id).await;
    tracing::info!(user_id = %user_id, "Session ended");
    Ok(Json(json!({ "signed_out": true })))
}
