use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::models::Booking;

const HEADER: &[&str] = &[
    "id",
    "property",
    "guest_name",
    "check_in_date",
    "check_out_date",
    "nights",
    "status",
    "channel",
    "gross_value",
    "channel_fee_value",
    "ad_cost",
    "tags",
    "notes",
];

/// Renders bookings as RFC 4180 CSV. `property_names` maps property ids to
/// display names; unknown ids fall back to the raw id.
pub fn render_bookings_csv(bookings: &[Booking], property_names: &HashMap<String, String>) -> String {
    let mut out = String::new();
    push_record(&mut out, HEADER.iter().copied());

    for booking in bookings {
        let property = property_names
            .get(&booking.property_id)
            .map(String::as_str)
            .unwrap_or(booking.property_id.as_str());
        let check_in = booking.check_in_date.to_string();
        let check_out = booking.check_out_date.to_string();
        let nights = booking.nights().to_string();
        let gross_value = money(booking.gross_value);
        let channel_fee = money(booking.channel_fee_value);
        let ad_cost = money(booking.ad_cost);
        let tags = booking.tags.join("; ");
        let notes = booking.notes.as_deref().unwrap_or_default();

        push_record(
            &mut out,
            [
                booking.id.as_str(),
                property,
                booking.guest_name.as_str(),
                check_in.as_str(),
                check_out.as_str(),
                nights.as_str(),
                booking.status.as_str(),
                booking.channel.as_str(),
                gross_value.as_str(),
                channel_fee.as_str(),
                ad_cost.as_str(),
                tags.as_str(),
                notes,
            ],
        );
    }
    out
}

/// Strong validator for the rendered body.
pub fn content_etag(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let hash = hasher.finalize();
    format!(
        "\"{}\"",
        hash[..16]
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>()
    )
}

fn push_record<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (index, field) in fields.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        out.push_str(&escape_field(field));
    }
    out.push_str("\r\n");
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn money(value: f64) -> String {
    format!("{value:.2}")
}
