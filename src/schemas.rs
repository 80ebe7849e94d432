use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_category_other() -> String {
    "other".to_string()
}
fn default_capacity() -> u32 {
    1
}
fn default_channel_direct() -> String {
    "direct".to_string()
}
fn default_status_confirmed() -> String {
    "confirmed".to_string()
}
fn default_period_days() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreatePropertyInput {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[serde(default = "default_category_other")]
    pub category: String,
    #[validate(length(max = 120))]
    pub city: Option<String>,
    #[validate(length(max = 60))]
    pub state: Option<String>,
    #[validate(range(min = 0.0))]
    pub average_daily_rate: Option<f64>,
    #[validate(range(min = 0.0))]
    pub fixed_cost_monthly: Option<f64>,
    #[validate(range(min = 0.0))]
    pub marketing_invest_monthly: Option<f64>,
    #[validate(url)]
    pub photo_url: Option<String>,
    #[serde(default = "default_capacity")]
    #[validate(range(min = 1, max = 10000))]
    pub capacity: u32,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdatePropertyInput {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    pub category: Option<String>,
    #[validate(length(max = 120))]
    pub city: Option<String>,
    #[validate(length(max = 60))]
    pub state: Option<String>,
    #[validate(range(min = 0.0))]
    pub average_daily_rate: Option<f64>,
    #[validate(range(min = 0.0))]
    pub fixed_cost_monthly: Option<f64>,
    #[validate(range(min = 0.0))]
    pub marketing_invest_monthly: Option<f64>,
    #[validate(url)]
    pub photo_url: Option<String>,
    #[validate(range(min = 1, max = 10000))]
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateBookingInput {
    pub property_id: String,
    #[validate(length(min = 1, max = 200))]
    pub guest_name: String,
    pub check_in_date: String,
    pub check_out_date: String,
    #[validate(range(min = 0.0))]
    pub gross_value: f64,
    #[serde(default = "default_channel_direct")]
    pub channel: String,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub channel_fee_value: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub ad_cost: f64,
    #[serde(default = "default_status_confirmed")]
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateBookingInput {
    pub property_id: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub guest_name: Option<String>,
    pub check_in_date: Option<String>,
    pub check_out_date: Option<String>,
    #[validate(range(min = 0.0))]
    pub gross_value: Option<f64>,
    pub channel: Option<String>,
    #[validate(range(min = 0.0))]
    pub channel_fee_value: Option<f64>,
    #[validate(range(min = 0.0))]
    pub ad_cost: Option<f64>,
    pub status: Option<String>,
    pub tags: Option<Vec<String>>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BookingTagsInput {
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ClientStatusInput {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PropertiesQuery {
    pub owner_id: Option<String>,
    pub category: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub struct BookingsQuery {
    pub owner_id: Option<String>,
    pub property_id: Option<String>,
    pub status: Option<String>,
    pub tag: Option<String>,
    #[serde(rename = "from")]
    pub from_date: Option<String>,
    #[serde(rename = "to")]
    pub to_date: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BookingTagsQuery {
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DashboardQuery {
    #[serde(default = "default_period_days")]
    pub period_days: u32,
    pub property_id: Option<String>,
    pub owner_id: Option<String>,
    pub request_token: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct AdminClientsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, 500)
}

fn default_limit_100() -> i64 {
    100
}

fn default_limit_200() -> i64 {
    200
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PropertyPath {
    pub property_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BookingPath {
    pub booking_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ClientPath {
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::{remove_nulls, serialize_to_map, validate_input, CreateBookingInput, CreatePropertyInput};
    use serde_json::json;

    #[test]
    fn booking_input_applies_defaults() {
        let input: CreateBookingInput = serde_json::from_value(json!({
            "property_id": "p1",
            "guest_name": "Ana",
            "check_in_date": "2024-01-10",
            "check_out_date": "2024-01-13",
            "gross_value": 900
        }))
        .expect("valid payload");
        assert_eq!(input.channel, "direct");
        assert_eq!(input.status, "confirmed");
        assert_eq!(input.ad_cost, 0.0);
        assert!(input.tags.is_empty());
        assert!(validate_input(&input).is_ok());
    }

    #[test]
    fn rejects_negative_money_and_zero_capacity() {
        let booking: CreateBookingInput = serde_json::from_value(json!({
            "property_id": "p1",
            "guest_name": "Ana",
            "check_in_date": "2024-01-10",
            "check_out_date": "2024-01-13",
            "gross_value": -1
        }))
        .expect("valid payload");
        assert!(validate_input(&booking).is_err());

        let property: CreatePropertyInput = serde_json::from_value(json!({
            "name": "Pousada Mar Azul",
            "category": "inn",
            "capacity": 0
        }))
        .expect("valid payload");
        assert!(validate_input(&property).is_err());
    }

    #[test]
    fn remove_nulls_drops_unset_fields() {
        let property: CreatePropertyInput = serde_json::from_value(json!({
            "name": "Hotel Central",
            "category": "hotel",
            "capacity": 24
        }))
        .expect("valid payload");
        let map = remove_nulls(serialize_to_map(&property));
        assert!(map.get("photo_url").is_none());
        assert_eq!(map.get("capacity"), Some(&json!(24)));
    }
}
