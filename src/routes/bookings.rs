use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
        HeaderMap, HeaderValue, Response, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::{
    access::{require_active_viewer, Viewer},
    db::db_pool,
    error::{AppError, AppResult},
    models::{decode_rows, Booking, BookingChannel, BookingStatus},
    repository::table_service::{
        create_row, delete_row, get_row, is_uuid_formatted, list_all_rows, list_rows, update_row,
    },
    routes::properties::{load_property, Access},
    schemas::{
        clamp_limit, remove_nulls, serialize_to_map, validate_input,
        BookingPath, BookingTagsInput, BookingTagsQuery, BookingsQuery, CreateBookingInput,
        UpdateBookingInput,
    },
    services::{
        booking_export::{content_etag, render_bookings_csv},
        tags::{count_tags, normalize_tag, normalize_tags},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/bookings",
            axum::routing::get(list_bookings).post(create_booking),
        )
        .route("/bookings/tags", axum::routing::get(list_booking_tags))
        .route("/bookings/export.csv", axum::routing::get(export_bookings_csv))
        .route(
            "/bookings/{booking_id}",
            axum::routing::get(get_booking)
                .patch(update_booking)
                .delete(delete_booking),
        )
        .route(
            "/bookings/{booking_id}/tags",
            axum::routing::put(replace_booking_tags),
        )
}

async fn list_bookings(
    State(state): State<AppState>,
    Query(query): Query<BookingsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = require_active_viewer(&state, &headers).await?;
    let owner_id = viewer.owner_scope(query.owner_id.as_deref())?;
    let pool = db_pool(&state)?;

    let filters = booking_filters(owner_id, &query)?;
    let rows = list_rows(
        pool,
        "bookings",
        Some(&filters),
        clamp_limit(query.limit),
        0,
        "check_in_date",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBookingInput>,
) -> AppResult<impl IntoResponse> {
    let viewer = require_active_viewer(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;
    load_property(pool, &viewer, &payload.property_id, Access::Write).await?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    normalize_booking_payload_for_write(&mut record, None)?;
    record.insert("owner_id".to_string(), Value::String(viewer.user_id.clone()));

    let created = create_row(pool, "bookings", &record).await?;
    tracing::info!(
        owner_id = %viewer.user_id,
        booking_id = %value_str(&created, "id"),
        property_id = %payload.property_id,
        "Booking created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = require_active_viewer(&state, &headers).await?;
    ensure_booking_id(&path.booking_id)?;
    let pool = db_pool(&state)?;
    let record = load_booking(pool, &viewer, &path.booking_id, Access::Read).await?;
    Ok(Json(record))
}

async fn update_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBookingInput>,
) -> AppResult<Json<Value>> {
    let viewer = require_active_viewer(&state, &headers).await?;
    validate_input(&payload)?;
    ensure_booking_id(&path.booking_id)?;
    let pool = db_pool(&state)?;
    let existing = load_booking(pool, &viewer, &path.booking_id, Access::Write).await?;

    if let Some(property_id) = payload.property_id.as_deref() {
        if property_id != value_str(&existing, "property_id") {
            load_property(pool, &viewer, property_id, Access::Write).await?;
        }
    }

    let mut patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Ok(Json(existing));
    }
    normalize_booking_payload_for_write(&mut patch, Some(&existing))?;
    let updated = update_row(pool, "bookings", &path.booking_id, &patch, "id").await?;
    Ok(Json(updated))
}

async fn delete_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = require_active_viewer(&state, &headers).await?;
    ensure_booking_id(&path.booking_id)?;
    let pool = db_pool(&state)?;
    load_booking(pool, &viewer, &path.booking_id, Access::Write).await?;

    let deleted = delete_row(pool, "bookings", &path.booking_id, "id").await?;
    tracing::info!(
        owner_id = %viewer.user_id,
        booking_id = %path.booking_id,
        "Booking deleted"
    );
    Ok(Json(deleted))
}

async fn replace_booking_tags(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
    Json(payload): Json<BookingTagsInput>,
) -> AppResult<Json<Value>> {
    let viewer = require_active_viewer(&state, &headers).await?;
    ensure_booking_id(&path.booking_id)?;
    let pool = db_pool(&state)?;
    load_booking(pool, &viewer, &path.booking_id, Access::Write).await?;

    let tags = normalize_tags(&payload.tags)?;
    let mut patch = Map::new();
    patch.insert("tags".to_string(), json!(tags));
    let updated = update_row(pool, "bookings", &path.booking_id, &patch, "id").await?;
    Ok(Json(updated))
}

async fn list_booking_tags(
    State(state): State<AppState>,
    Query(query): Query<BookingTagsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = require_active_viewer(&state, &headers).await?;
    let owner_id = viewer.owner_scope(query.owner_id.as_deref())?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert("owner_id".to_string(), Value::String(owner_id));
    let rows = list_all_rows(pool, "bookings", Some(&filters), "check_in_date", false).await?;

    let tag_lists = rows.iter().map(row_tags).collect::<Vec<_>>();
    let counts = count_tags(tag_lists.iter().map(Vec::as_slice));
    Ok(Json(json!({ "data": counts })))
}

async fn export_bookings_csv(
    State(state): State<AppState>,
    Query(query): Query<BookingsQuery>,
    headers: HeaderMap,
) -> AppResult<Response<Body>> {
    let viewer = require_active_viewer(&state, &headers).await?;
    let owner_id = viewer.owner_scope(query.owner_id.as_deref())?;
    let pool = db_pool(&state)?;

    let filters = booking_filters(owner_id.clone(), &query)?;
    let rows = list_all_rows(pool, "bookings", Some(&filters), "check_in_date", true).await?;
    let (bookings, skipped) = decode_rows::<Booking>(&rows);
    if skipped > 0 {
        tracing::warn!(owner_id = %owner_id, skipped, "Export left out malformed bookings");
    }

    let property_names = load_property_names(pool, &owner_id).await?;
    let csv = render_bookings_csv(&bookings, &property_names);
    let etag = content_etag(&csv);

    if if_none_match_hits(&headers, &etag) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .body(Body::empty())
            .map_err(|error| {
                tracing::error!(error = %error, "Could not build 304 response");
                AppError::Internal("Could not build response.".to_string())
            });
    }

    let filename = format!(
        "attachment; filename=\"bookings-{}.csv\"",
        chrono::Utc::now()
            .with_timezone(&state.config.report_timezone)
            .date_naive()
    );
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .body(Body::from(csv))
        .map_err(|error| {
            tracing::error!(error = %error, "Could not build CSV response");
            AppError::Internal("Could not build CSV response.".to_string())
        })?;
    let response_headers = response.headers_mut();
    response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8"));
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("private, no-cache"));
    if let Ok(value) = HeaderValue::from_str(&filename) {
        response_headers.insert(CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response_headers.insert(ETAG, value);
    }
    Ok(response)
}

async fn load_booking(
    pool: &sqlx::PgPool,
    viewer: &Viewer,
    booking_id: &str,
    access: Access,
) -> AppResult<Value> {
    let record = get_row(pool, "bookings", booking_id, "id").await?;
    let owner_id = value_str(&record, "owner_id");
    let allowed = match access {
        Access::Read => viewer.can_read_owner(&owner_id),
        Access::Write => viewer.can_write_owner(&owner_id),
    };
    if !allowed {
        return Err(AppError::NotFound("bookings record not found.".to_string()));
    }
    Ok(record)
}

fn ensure_booking_id(booking_id: &str) -> AppResult<()> {
    if is_uuid_formatted(booking_id) {
        return Ok(());
    }
    Err(AppError::BadRequest("Invalid booking id.".to_string()))
}

async fn load_property_names(
    pool: &sqlx::PgPool,
    owner_id: &str,
) -> AppResult<HashMap<String, String>> {
    let mut filters = Map::new();
    filters.insert("owner_id".to_string(), Value::String(owner_id.to_string()));
    let rows = list_all_rows(pool, "properties", Some(&filters), "name", true).await?;
    Ok(rows
        .iter()
        .map(|row| (value_str(row, "id"), value_str(row, "name")))
        .filter(|(id, name)| !id.is_empty() && !name.is_empty())
        .collect())
}

fn booking_filters(owner_id: String, query: &BookingsQuery) -> AppResult<Map<String, Value>> {
    let mut filters = Map::new();
    filters.insert("owner_id".to_string(), Value::String(owner_id));

    if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        if !is_uuid_formatted(&property_id) {
            return Err(AppError::BadRequest("Invalid property id.".to_string()));
        }
        filters.insert("property_id".to_string(), Value::String(property_id));
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        let status = BookingStatus::parse(&status)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown booking status '{status}'.")))?;
        filters.insert(
            "status".to_string(),
            Value::String(status.as_str().to_string()),
        );
    }
    if let Some(tag) = query.tag.as_deref().and_then(normalize_tag) {
        filters.insert("tags__contains".to_string(), Value::String(tag));
    }

    let from = non_empty_opt(query.from_date.as_deref())
        .map(|value| parse_date(&value))
        .transpose()?;
    let to = non_empty_opt(query.to_date.as_deref())
        .map(|value| parse_date(&value))
        .transpose()?;
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(AppError::BadRequest(
                "'from' must be on or before 'to'.".to_string(),
            ));
        }
    }
    if let Some(from) = from {
        filters.insert(
            "check_in_date__gte".to_string(),
            Value::String(from.to_string()),
        );
    }
    if let Some(to) = to {
        filters.insert(
            "check_in_date__lte".to_string(),
            Value::String(to.to_string()),
        );
    }
    Ok(filters)
}

/// Canonicalizes enum fields and tags, and checks the stay dates against the
/// stored row when only one side changes.
fn normalize_booking_payload_for_write(
    payload: &mut Map<String, Value>,
    existing: Option<&Value>,
) -> AppResult<()> {
    if let Some(raw) = payload.get("channel").and_then(Value::as_str) {
        let channel = BookingChannel::parse(raw).ok_or_else(|| {
            AppError::UnprocessableEntity(format!("Unknown booking channel '{raw}'."))
        })?;
        payload.insert(
            "channel".to_string(),
            Value::String(channel.as_str().to_string()),
        );
    }
    if let Some(raw) = payload.get("status").and_then(Value::as_str) {
        let status = BookingStatus::parse(raw).ok_or_else(|| {
            AppError::UnprocessableEntity(format!("Unknown booking status '{raw}'."))
        })?;
        payload.insert(
            "status".to_string(),
            Value::String(status.as_str().to_string()),
        );
    }
    if let Some(tags) = payload.get("tags").and_then(Value::as_array) {
        let raw = tags
            .iter()
            .filter_map(Value::as_str)
            .map(ToOwned::to_owned)
            .collect::<Vec<_>>();
        payload.insert("tags".to_string(), json!(normalize_tags(&raw)?));
    }
    if let Some(guest_name) = payload.get("guest_name").and_then(Value::as_str) {
        let trimmed = guest_name.trim().to_string();
        if trimmed.is_empty() {
            return Err(AppError::UnprocessableEntity(
                "Guest name cannot be blank.".to_string(),
            ));
        }
        payload.insert("guest_name".to_string(), Value::String(trimmed));
    }

    let touches_dates =
        payload.contains_key("check_in_date") || payload.contains_key("check_out_date");
    if touches_dates || existing.is_none() {
        let effective = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .or_else(|| existing.map(|row| value_str(row, key)))
                .unwrap_or_default()
        };
        let check_in = parse_stay_date(&effective("check_in_date"), "check_in_date")?;
        let check_out = parse_stay_date(&effective("check_out_date"), "check_out_date")?;
        if check_out <= check_in {
            return Err(AppError::BadRequest(
                "check_out_date must be after check_in_date.".to_string(),
            ));
        }
        for (key, date) in [("check_in_date", check_in), ("check_out_date", check_out)] {
            if payload.contains_key(key) {
                payload.insert(key.to_string(), Value::String(date.to_string()));
            }
        }
    }

    Ok(())
}

fn row_tags(row: &Value) -> Vec<String> {
    row.get("tags")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn if_none_match_hits(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(',')
                .map(str::trim)
                .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
        })
}

fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("Invalid ISO date.".to_string()))
}

fn parse_stay_date(value: &str, field: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest(format!("{field} must be an ISO date (YYYY-MM-DD)."))
    })
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
