use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};

use crate::{
    access::require_active_viewer,
    db::db_pool,
    error::{AppError, AppResult},
    models::{decode_rows, Booking, BookingStatus, Property},
    repository::table_service::{is_uuid_formatted, list_all_rows},
    schemas::DashboardQuery,
    services::analytics::{aggregate, Overview, ReportingPeriod},
    state::AppState,
};

const MAX_PERIOD_DAYS: u32 = 366;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/dashboard/overview",
        axum::routing::get(dashboard_overview),
    )
}

async fn dashboard_overview(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = require_active_viewer(&state, &headers).await?;
    let owner_id = viewer.owner_scope(query.owner_id.as_deref())?;
    let property_id = query
        .property_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if property_id.is_some_and(|id| !is_uuid_formatted(id)) {
        return Err(AppError::BadRequest("Invalid property id.".to_string()));
    }

    let today = Utc::now()
        .with_timezone(&state.config.report_timezone)
        .date_naive();
    let period = reporting_period(query.period_days, today)?;
    let pool = db_pool(&state)?;

    let mut property_filters = Map::new();
    property_filters.insert("owner_id".to_string(), Value::String(owner_id.clone()));
    if let Some(property_id) = property_id {
        property_filters.insert("id".to_string(), Value::String(property_id.to_string()));
    }
    let current_filters = window_filters(&owner_id, property_id, period.start(), period.end());
    let previous_filters = window_filters(
        &owner_id,
        property_id,
        period.previous_start(),
        period.previous_end(),
    );

    let (property_rows, current_rows, previous_rows) = tokio::try_join!(
        list_all_rows(pool, "properties", Some(&property_filters), "name", true),
        list_all_rows(pool, "bookings", Some(&current_filters), "check_in_date", true),
        list_all_rows(pool, "bookings", Some(&previous_filters), "check_in_date", true),
    )?;

    if property_id.is_some() && property_rows.is_empty() {
        return Err(AppError::NotFound("properties record not found.".to_string()));
    }

    let (properties, skipped_properties) = decode_rows::<Property>(&property_rows);
    let (bookings, skipped_current) = decode_rows::<Booking>(&current_rows);
    let (previous_bookings, skipped_previous) = decode_rows::<Booking>(&previous_rows);
    let skipped = skipped_properties + skipped_current + skipped_previous;

    let overview = aggregate(&bookings, &previous_bookings, &properties, &period);
    tracing::debug!(
        owner_id = %owner_id,
        period_days = period.days(),
        bookings = bookings.len(),
        skipped,
        "Dashboard overview computed"
    );
    Ok(Json(overview_body(
        &period,
        overview,
        skipped,
        query.request_token,
    )))
}

fn reporting_period(days: u32, today: NaiveDate) -> AppResult<ReportingPeriod> {
    if days > MAX_PERIOD_DAYS {
        return Err(AppError::BadRequest(format!(
            "period_days must be between 1 and {MAX_PERIOD_DAYS}."
        )));
    }
    ReportingPeriod::new(days, today).ok_or_else(|| {
        AppError::BadRequest(format!(
            "period_days must be between 1 and {MAX_PERIOD_DAYS}."
        ))
    })
}

/// Non-cancelled bookings of one owner whose check-in falls in `[from, to]`.
fn window_filters(
    owner_id: &str,
    property_id: Option<&str>,
    from: NaiveDate,
    to: NaiveDate,
) -> Map<String, Value> {
    let mut filters = Map::new();
    filters.insert("owner_id".to_string(), Value::String(owner_id.to_string()));
    if let Some(property_id) = property_id {
        filters.insert(
            "property_id".to_string(),
            Value::String(property_id.to_string()),
        );
    }
    filters.insert(
        "status__neq".to_string(),
        Value::String(BookingStatus::Cancelled.as_str().to_string()),
    );
    filters.insert(
        "check_in_date__gte".to_string(),
        Value::String(from.to_string()),
    );
    filters.insert(
        "check_in_date__lte".to_string(),
        Value::String(to.to_string()),
    );
    filters
}

fn overview_body(
    period: &ReportingPeriod,
    overview: Overview,
    skipped_records: usize,
    request_token: Option<u64>,
) -> Value {
    json!({
        "period": {
            "days": period.days(),
            "from": period.start().to_string(),
            "to": period.end().to_string(),
            "previous_from": period.previous_start().to_string(),
            "previous_to": period.previous_end().to_string(),
        },
        "metrics": overview.metrics,
        "series": overview.series,
        "skipped_records": skipped_records,
        "request_token": request_token,
    })
}
