use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyCategory {
    /// Cabin or chalet.
    Cabin,
    Hotel,
    Inn,
    Other,
}

impl PropertyCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cabin => "cabin",
            Self::Hotel => "hotel",
            Self::Inn => "inn",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cabin" | "chalet" => Some(Self::Cabin),
            "hotel" => Some(Self::Hotel),
            "inn" => Some(Self::Inn),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingChannel {
    Direct,
    /// Third-party booking platform.
    Booking,
    /// Third-party short-stay platform.
    Airbnb,
    Other,
}

impl BookingChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Booking => "booking",
            Self::Airbnb => "airbnb",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "booking" => Some(Self::Booking),
            "airbnb" => Some(Self::Airbnb),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Pending,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Pending => "pending",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "confirmed" => Some(Self::Confirmed),
            "pending" => Some(Self::Pending),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// One rentable listing. `capacity` is the number of identical units the
/// listing represents; a cabin is 1, a hotel row may carry its room count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub category: PropertyCategory,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub average_daily_rate: Option<f64>,
    #[serde(default)]
    pub fixed_cost_monthly: Option<f64>,
    #[serde(default)]
    pub marketing_invest_monthly: Option<f64>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default = "default_capacity", deserialize_with = "capacity_or_default")]
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub owner_id: String,
    pub property_id: String,
    pub guest_name: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub gross_value: f64,
    pub channel: BookingChannel,
    #[serde(default, deserialize_with = "null_as_default")]
    pub channel_fee_value: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ad_cost: f64,
    pub status: BookingStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Booking {
    /// Whole nights between check-in and check-out.
    pub fn nights(&self) -> i64 {
        (self.check_out_date - self.check_in_date).num_days()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == BookingStatus::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordError {
    pub id: String,
    pub reason: String,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {}: {}", self.id, self.reason)
    }
}

impl TryFrom<&Value> for Booking {
    type Error = RecordError;

    fn try_from(row: &Value) -> Result<Self, Self::Error> {
        let booking = Booking::deserialize(row).map_err(|error| RecordError {
            id: row_id(row),
            reason: error.to_string(),
        })?;
        if booking.check_out_date <= booking.check_in_date {
            return Err(RecordError {
                id: booking.id,
                reason: "check-out is not after check-in".to_string(),
            });
        }
        if !booking.gross_value.is_finite()
            || !booking.channel_fee_value.is_finite()
            || !booking.ad_cost.is_finite()
        {
            return Err(RecordError {
                id: booking.id,
                reason: "non-finite amount".to_string(),
            });
        }
        Ok(booking)
    }
}

impl TryFrom<&Value> for Property {
    type Error = RecordError;

    fn try_from(row: &Value) -> Result<Self, Self::Error> {
        Property::deserialize(row).map_err(|error| RecordError {
            id: row_id(row),
            reason: error.to_string(),
        })
    }
}

/// Decodes rows, dropping the ones that fail validation. Returns the
/// decoded records and the number of rejected rows.
pub fn decode_rows<'a, T>(rows: &'a [Value]) -> (Vec<T>, usize)
where
    T: TryFrom<&'a Value, Error = RecordError>,
{
    let mut decoded = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in rows {
        match T::try_from(row) {
            Ok(record) => decoded.push(record),
            Err(error) => {
                tracing::warn!(record_id = %error.id, reason = %error.reason, "Rejected malformed record");
                skipped += 1;
            }
        }
    }
    (decoded, skipped)
}

fn row_id(row: &Value) -> String {
    row.get("id")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string()
}

fn default_capacity() -> u32 {
    1
}

fn capacity_or_default<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<u32>::deserialize(deserializer)?;
    Ok(value.filter(|capacity| *capacity > 0).unwrap_or(1))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
