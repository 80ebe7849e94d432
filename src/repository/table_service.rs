use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &["bookings", "profiles", "properties"];
const MAX_LIST_LIMIT: i64 = 5000;

/// Lists rows as JSON objects. Filter keys are column names with an
/// optional operator suffix: `__neq`, `__gte`, `__lte` or `__contains`
/// (array column holds the value). Filter values are scalars; `null`
/// skips the filter.
pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let mut query = build_list_query(table, filters, limit, offset, order_by, ascending)?;
    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

/// Lists every matching row, reading `MAX_LIST_LIMIT` rows per page until
/// a short page comes back.
pub async fn list_all_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    collect_pages(MAX_LIST_LIMIT, |offset| {
        list_rows(pool, table, filters, MAX_LIST_LIMIT, offset, order_by, ascending)
    })
    .await
}

async fn collect_pages<F, Fut>(page_size: i64, mut fetch: F) -> Result<Vec<Value>, AppError>
where
    F: FnMut(i64) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Value>, AppError>>,
{
    let mut rows = Vec::new();
    let mut offset = 0;
    loop {
        let page = fetch(offset).await?;
        let fetched = page.len() as i64;
        rows.extend(page);
        if fetched < page_size {
            return Ok(rows);
        }
        offset += fetched;
    }
}

pub async fn get_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_scalar_filter(
        &mut query,
        id_name,
        FilterOperator::Eq,
        &infer_scalar_filter(id_name, &Value::String(row_id.to_string())),
    );
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn create_row(
    pool: &sqlx::PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }
    let keys = sorted_keys(payload)?;

    // jsonb_populate_record lets PostgreSQL resolve column types (uuid,
    // date, numeric, text[]) from the table definition.
    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(*key);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    let keys = sorted_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
            separated.push_unseparated(" = r.");
            separated.push_unseparated(*key);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE ");
    push_scalar_filter(
        &mut query,
        id_name,
        FilterOperator::Eq,
        &infer_scalar_filter(id_name, &Value::String(row_id.to_string())),
    );
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn delete_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let existing = get_row(pool, table, row_id, id_field).await?;
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE ");
    push_scalar_filter(
        &mut query,
        id_name,
        FilterOperator::Eq,
        &infer_scalar_filter(id_name, &Value::String(row_id.to_string())),
    );
    query.build().execute(pool).await.map_err(map_db_error)?;

    Ok(existing)
}

pub async fn count_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
) -> Result<i64, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    let row = query.build().fetch_one(pool).await.map_err(map_db_error)?;

    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

pub(crate) fn is_uuid_formatted(value: &str) -> bool {
    uuid::Uuid::try_parse(value).is_ok()
}

fn build_list_query<'a>(
    table: &'a str,
    filters: Option<&'a Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &'a str,
    ascending: bool,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    // id breaks ties so OFFSET pages neither repeat nor skip rows.
    let direction = if ascending { " ASC" } else { " DESC" };
    query.push(" ORDER BY t.").push(order_name).push(direction);
    if order_name != "id" {
        query.push(", t.id").push(direction);
    }
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, MAX_LIST_LIMIT))
        .push(" OFFSET ")
        .push_bind(offset.max(0));
    Ok(query)
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn sorted_keys(payload: &Map<String, Value>) -> Result<Vec<&str>, AppError> {
    let mut keys = payload
        .keys()
        .map(|key| validate_identifier(key))
        .collect::<Result<Vec<_>, _>>()?;
    keys.sort_unstable();
    Ok(keys)
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    if !trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) || trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit())
    {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ScalarFilter {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
    I64(i64),
    F64(f64),
    Date(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOperator {
    Eq,
    Neq,
    Gte,
    Lte,
    Contains,
}

fn parse_filter_key(filter_key: &str) -> Result<(&str, FilterOperator), AppError> {
    let Some((column, suffix)) = filter_key.rsplit_once("__") else {
        return Ok((validate_identifier(filter_key)?, FilterOperator::Eq));
    };
    let operator = match suffix {
        "neq" => FilterOperator::Neq,
        "gte" => FilterOperator::Gte,
        "lte" => FilterOperator::Lte,
        "contains" => FilterOperator::Contains,
        _ => {
            return Err(AppError::BadRequest(format!(
                "Unsupported filter '{filter_key}'."
            )))
        }
    };
    Ok((validate_identifier(column)?, operator))
}

fn scalar_to_text(value: &ScalarFilter) -> String {
    match value {
        ScalarFilter::Text(text) => text.clone(),
        ScalarFilter::Uuid(id) => id.to_string(),
        ScalarFilter::Bool(flag) => flag.to_string(),
        ScalarFilter::I64(number) => number.to_string(),
        ScalarFilter::F64(number) => number.to_string(),
        ScalarFilter::Date(value) => value.to_string(),
    }
}

fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let (column, operator) = parse_filter_key(filter_key)?;

    match value {
        Value::Null => Ok(()),
        Value::Array(_) | Value::Object(_) => Err(AppError::BadRequest(format!(
            "Filter '{filter_key}' expects a scalar value."
        ))),
        _ => {
            query.push(" AND ");
            let filter = infer_scalar_filter(column, value);
            push_scalar_filter(query, column, operator, &filter);
            Ok(())
        }
    }
}

fn push_scalar_filter(
    query: &mut QueryBuilder<Postgres>,
    column: &str,
    operator: FilterOperator,
    value: &ScalarFilter,
) {
    let sql_operator = match operator {
        FilterOperator::Eq => " = ",
        FilterOperator::Neq => " <> ",
        FilterOperator::Gte => " >= ",
        FilterOperator::Lte => " <= ",
        FilterOperator::Contains => {
            query
                .push("t.")
                .push(column)
                .push(" @> ARRAY[")
                .push_bind(scalar_to_text(value))
                .push("]::text[]");
            return;
        }
    };

    query.push("t.").push(column);
    match value {
        ScalarFilter::Text(text) => {
            query
                .push("::text")
                .push(sql_operator)
                .push_bind(text.clone());
        }
        ScalarFilter::Uuid(id) => {
            query.push(sql_operator).push_bind(*id);
        }
        ScalarFilter::Bool(flag) => {
            query.push(sql_operator).push_bind(*flag);
        }
        ScalarFilter::I64(number) => {
            query.push(sql_operator).push_bind(*number);
        }
        ScalarFilter::F64(number) => {
            query.push(sql_operator).push_bind(*number);
        }
        ScalarFilter::Date(value) => {
            query.push(sql_operator).push_bind(*value);
        }
    }
}

fn infer_scalar_filter(filter_key: &str, value: &Value) -> ScalarFilter {
    match value {
        Value::Bool(flag) => ScalarFilter::Bool(*flag),
        Value::Number(number) => number
            .as_i64()
            .map(ScalarFilter::I64)
            .or_else(|| number.as_f64().map(ScalarFilter::F64))
            .unwrap_or_else(|| ScalarFilter::Text(number.to_string())),
        Value::String(text) => {
            let trimmed = text.trim();
            if is_uuid_identifier(filter_key) {
                if let Ok(parsed) = uuid::Uuid::parse_str(trimmed) {
                    return ScalarFilter::Uuid(parsed);
                }
            }
            if is_date_identifier(filter_key) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return ScalarFilter::Date(parsed);
                }
            }
            ScalarFilter::Text(text.clone())
        }
        _ => ScalarFilter::Text(render_scalar(value)),
    }
}

fn is_uuid_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized == "id" || normalized.ends_with("_id")
}

fn is_date_identifier(identifier: &str) -> bool {
    identifier.trim().ends_with("_date")
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    if message.contains("23503") {
        return AppError::Conflict("Record is still referenced by other rows.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{
        build_list_query, collect_pages, infer_scalar_filter, is_uuid_formatted,
        parse_filter_key, FilterOperator, ScalarFilter,
    };
    use crate::error::AppError;

    fn filters(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn parses_operator_suffixes() {
        assert_eq!(
            parse_filter_key("status__neq").expect("valid"),
            ("status", FilterOperator::Neq)
        );
        assert_eq!(
            parse_filter_key("check_in_date__gte").expect("valid"),
            ("check_in_date", FilterOperator::Gte)
        );
        assert_eq!(
            parse_filter_key("property_id").expect("valid"),
            ("property_id", FilterOperator::Eq)
        );
        assert!(parse_filter_key("status__bogus").is_err());
        assert!(parse_filter_key("name__ilike").is_err());
        assert!(parse_filter_key("property_id__in").is_err());
        assert!(parse_filter_key("Status").is_err());
    }

    #[test]
    fn infers_typed_scalars_from_column_names() {
        assert_eq!(
            infer_scalar_filter("check_in_date", &json!("2024-01-10")),
            ScalarFilter::Date(chrono::NaiveDate::from_ymd_opt(2024, 1, 10).expect("date"))
        );
        assert!(matches!(
            infer_scalar_filter("owner_id", &json!("550e8400-e29b-41d4-a716-446655440000")),
            ScalarFilter::Uuid(_)
        ));
        assert_eq!(
            infer_scalar_filter("owner_id", &json!("not-a-uuid")),
            ScalarFilter::Text("not-a-uuid".to_string())
        );
    }

    #[test]
    fn builds_range_and_exclusion_query() {
        let filters = filters(&[
            ("owner_id", json!("550e8400-e29b-41d4-a716-446655440000")),
            ("check_in_date__gte", json!("2024-01-01")),
            ("check_in_date__lte", json!("2024-01-30")),
            ("status__neq", json!("cancelled")),
            ("tags__contains", json!("vip")),
        ]);
        let query = build_list_query("bookings", Some(&filters), 100, 0, "check_in_date", true)
            .expect("valid query");
        let sql = query.sql();

        assert!(sql.starts_with("SELECT row_to_json(t) AS row FROM bookings t WHERE 1=1"));
        assert!(sql.contains("t.check_in_date >= $"), "got: {sql}");
        assert!(sql.contains("t.check_in_date <= $"), "got: {sql}");
        assert!(sql.contains("t.status::text <> $"), "got: {sql}");
        assert!(sql.contains("t.tags @> ARRAY[$"), "got: {sql}");
        assert!(
            sql.contains("ORDER BY t.check_in_date ASC, t.id ASC"),
            "got: {sql}"
        );
    }

    #[test]
    fn array_filter_values_are_rejected() {
        let filters = filters(&[("property_id", json!([]))]);
        assert!(build_list_query("properties", Some(&filters), 10, 0, "", false).is_err());
    }

    async fn page_of(rows: &[Value], offset: i64, page_size: i64) -> Result<Vec<Value>, AppError> {
        let start = (offset as usize).min(rows.len());
        let end = (start + page_size as usize).min(rows.len());
        Ok(rows[start..end].to_vec())
    }

    #[tokio::test]
    async fn collects_every_page_past_the_page_size() {
        let rows: Vec<Value> = (0..5).map(|index| json!({ "n": index })).collect();
        let mut calls = Vec::new();
        let collected = collect_pages(2, |offset| {
            calls.push(offset);
            page_of(&rows, offset, 2)
        })
        .await
        .expect("pages collect");
        assert_eq!(collected, rows);
        assert_eq!(calls, vec![0, 2, 4]);

        // An exact multiple needs one trailing empty page.
        let even = &rows[..4];
        let mut calls = 0;
        let collected = collect_pages(2, |offset| {
            calls += 1;
            page_of(even, offset, 2)
        })
        .await
        .expect("pages collect");
        assert_eq!(collected.len(), 4);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn page_errors_propagate() {
        let result = collect_pages(2, |_| async {
            Err::<Vec<Value>, _>(AppError::Dependency("Database operation failed.".to_string()))
        })
        .await;
        assert!(matches!(result, Err(AppError::Dependency(_))));
    }

    #[test]
    fn rejects_tables_outside_allow_list() {
        assert!(build_list_query("auth_users", None, 10, 0, "", true).is_err());
    }

    #[test]
    fn uuid_detection() {
        assert!(is_uuid_formatted("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_uuid_formatted("not-a-uuid"));
        assert!(!is_uuid_formatted(""));
    }
}
