use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    access::{end_session, require_admin},
    db::db_pool,
    error::{AppError, AppResult},
    models::{ApprovalStatus, Role},
    repository::table_service::{count_rows, get_row, is_uuid_formatted, list_rows, update_row},
    schemas::{clamp_limit, AdminClientsQuery, ClientPath, ClientStatusInput},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/admin/clients", axum::routing::get(list_clients))
        .route(
            "/admin/clients/{user_id}/status",
            axum::routing::post(set_client_status),
        )
}

async fn list_clients(
    State(state): State<AppState>,
    Query(query): Query<AdminClientsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let filters = client_filters(query.status.as_deref())?;
    let (rows, total) = tokio::try_join!(
        list_rows(
            pool,
            "profiles",
            Some(&filters),
            clamp_limit(query.limit),
            0,
            "created_at",
            false,
        ),
        count_rows(pool, "profiles", Some(&filters)),
    )?;
    Ok(Json(json!({ "data": rows, "total": total })))
}

async fn set_client_status(
    State(state): State<AppState>,
    Path(path): Path<ClientPath>,
    headers: HeaderMap,
    Json(payload): Json<ClientStatusInput>,
) -> AppResult<Json<Value>> {
    let admin = require_admin(&state, &headers).await?;
    let status = ApprovalStatus::parse(&payload.status).ok_or_else(|| {
        AppError::UnprocessableEntity(format!("Unknown approval status '{}'.", payload.status))
    })?;
    if !is_uuid_formatted(&path.user_id) {
        return Err(AppError::BadRequest("Invalid user id.".to_string()));
    }
    let pool = db_pool(&state)?;

    let profile = get_row(pool, "profiles", &path.user_id, "id").await?;
    let role = profile
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if role == Role::Admin.as_str() {
        return Err(AppError::Conflict(
            "Admin accounts have no approval status.".to_string(),
        ));
    }

    let mut patch = Map::new();
    patch.insert(
        "status".to_string(),
        Value::String(status.as_str().to_string()),
    );
    let updated = update_row(pool, "profiles", &path.user_id, &patch, "id").await?;
    end_session(&state, &path.user_id).await;

    tracing::info!(
        admin_id = %admin.user_id,
        user_id = %path.user_id,
        status = status.as_str(),
        "Client approval status changed"
    );
    Ok(Json(updated))
}

fn client_filters(status: Option<&str>) -> AppResult<Map<String, Value>> {
    let mut filters = Map::new();
    filters.insert(
        "role".to_string(),
        Value::String(Role::Client.as_str().to_string()),
    );
    if let Some(raw) = status.map(str::trim).filter(|value| !value.is_empty()) {
        let status = ApprovalStatus::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown approval status '{raw}'.")))?;
        filters.insert(
            "status".to_string(),
            Value::String(status.as_str().to_string()),
        );
    }
    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::client_filters;
    use serde_json::json;

    #[test]
    fn lists_only_clients_optionally_by_status() {
        let all = client_filters(None).expect("valid");
        assert_eq!(all.get("role"), Some(&json!("client")));
        assert!(all.get("status").is_none());

        let pending = client_filters(Some(" Pending ")).expect("valid");
        assert_eq!(pending.get("status"), Some(&json!("pending")));

        assert!(client_filters(Some("banned")).is_err());
    }
}
