use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    access::{require_active_viewer, Viewer},
    db::db_pool,
    error::{AppError, AppResult},
    models::PropertyCategory,
    repository::table_service::{
        create_row, delete_row, get_row, is_uuid_formatted, list_rows, update_row,
    },
    schemas::{
        clamp_limit, remove_nulls, serialize_to_map, validate_input, CreatePropertyInput,
        PropertiesQuery, PropertyPath, UpdatePropertyInput,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/properties",
            axum::routing::get(list_properties).post(create_property),
        )
        .route(
            "/properties/{property_id}",
            axum::routing::get(get_property)
                .patch(update_property)
                .delete(delete_property),
        )
}

async fn list_properties(
    State(state): State<AppState>,
    Query(query): Query<PropertiesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = require_active_viewer(&state, &headers).await?;
    let owner_id = viewer.owner_scope(query.owner_id.as_deref())?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert("owner_id".to_string(), Value::String(owner_id));
    if let Some(category) = non_empty_opt(query.category.as_deref()) {
        let category = PropertyCategory::parse(&category).ok_or_else(|| {
            AppError::BadRequest(format!("Unknown property category '{category}'."))
        })?;
        filters.insert(
            "category".to_string(),
            Value::String(category.as_str().to_string()),
        );
    }

    let rows = list_rows(
        pool,
        "properties",
        Some(&filters),
        clamp_limit(query.limit),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_property(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePropertyInput>,
) -> AppResult<impl IntoResponse> {
    let viewer = require_active_viewer(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    normalize_property_payload_for_write(&mut record)?;
    record.insert("owner_id".to_string(), Value::String(viewer.user_id.clone()));

    let created = create_row(pool, "properties", &record).await?;
    tracing::info!(
        owner_id = %viewer.user_id,
        property_id = %value_str(&created, "id"),
        "Property created"
    );
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = require_active_viewer(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let record = load_property(pool, &viewer, &path.property_id, Access::Read).await?;
    Ok(Json(record))
}

async fn update_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePropertyInput>,
) -> AppResult<Json<Value>> {
    let viewer = require_active_viewer(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;
    load_property(pool, &viewer, &path.property_id, Access::Write).await?;

    let mut patch = remove_nulls(serialize_to_map(&payload));
    normalize_property_payload_for_write(&mut patch)?;
    let updated = update_row(pool, "properties", &path.property_id, &patch, "id").await?;
    Ok(Json(updated))
}

async fn delete_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = require_active_viewer(&state, &headers).await?;
    let pool = db_pool(&state)?;
    load_property(pool, &viewer, &path.property_id, Access::Write).await?;

    let deleted = delete_row(pool, "properties", &path.property_id, "id").await?;
    tracing::info!(
        owner_id = %viewer.user_id,
        property_id = %path.property_id,
        "Property deleted"
    );
    Ok(Json(deleted))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    Write,
}

/// Fetches a property the viewer may read (or write). Rows of other owners
/// are reported as missing.
pub(crate) async fn load_property(
    pool: &sqlx::PgPool,
    viewer: &Viewer,
    property_id: &str,
    access: Access,
) -> AppResult<Value> {
    if !is_uuid_formatted(property_id) {
        return Err(AppError::BadRequest("Invalid property id.".to_string()));
    }
    let record = get_row(pool, "properties", property_id, "id").await?;
    let owner_id = value_str(&record, "owner_id");
    let allowed = match access {
        Access::Read => viewer.can_read_owner(&owner_id),
        Access::Write => viewer.can_write_owner(&owner_id),
    };
    if !allowed {
        return Err(AppError::NotFound("properties record not found.".to_string()));
    }
    Ok(record)
}

fn normalize_property_payload_for_write(payload: &mut Map<String, Value>) -> AppResult<()> {
    if let Some(raw) = payload.get("category").and_then(Value::as_str) {
        let category = PropertyCategory::parse(raw).ok_or_else(|| {
            AppError::UnprocessableEntity(format!("Unknown property category '{raw}'."))
        })?;
        payload.insert(
            "category".to_string(),
            Value::String(category.as_str().to_string()),
        );
    }

    for key in ["name", "city"] {
        if let Some(text) = payload.get(key).and_then(Value::as_str) {
            let trimmed = text.trim().to_string();
            payload.insert(key.to_string(), Value::String(trimmed));
        }
    }
    if let Some(state_code) = payload.get("state").and_then(Value::as_str) {
        let normalized = state_code.trim().to_uppercase();
        payload.insert("state".to_string(), Value::String(normalized));
    }
    if payload
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(str::is_empty)
    {
        return Err(AppError::UnprocessableEntity(
            "Property name cannot be blank.".to_string(),
        ));
    }
    Ok(())
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::normalize_property_payload_for_write;
    use serde_json::{Map, Value};

    #[test]
    fn normalizes_category_and_state() {
        let mut payload = Map::new();
        payload.insert("category".to_string(), Value::String("Chalet".to_string()));
        payload.insert("state".to_string(), Value::String(" sc ".to_string()));
        payload.insert("name".to_string(), Value::String("  Chalé Aurora ".to_string()));

        normalize_property_payload_for_write(&mut payload).expect("valid payload");

        assert_eq!(
            payload.get("category").and_then(Value::as_str),
            Some("cabin")
        );
        assert_eq!(payload.get("state").and_then(Value::as_str), Some("SC"));
        assert_eq!(
            payload.get("name").and_then(Value::as_str),
            Some("Chalé Aurora")
        );
    }

    #[test]
    fn rejects_unknown_category_and_blank_name() {
        let mut payload = Map::new();
        payload.insert("category".to_string(), Value::String("castle".to_string()));
        assert!(normalize_property_payload_for_write(&mut payload).is_err());

        let mut payload = Map::new();
        payload.insert("name".to_string(), Value::String("   ".to_string()));
        assert!(normalize_property_payload_for_write(&mut payload).is_err());
    }
}
