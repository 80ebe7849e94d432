pub mod analytics;
pub mod booking_export;
pub mod tags;
