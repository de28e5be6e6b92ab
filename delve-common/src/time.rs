//! Timestamp utilities

use chrono::{DateTime, Datelike, Months, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Fixed-width RFC 3339 form used for TEXT timestamp columns
///
/// Fixed width keeps lexicographic order equal to chronological order.
pub fn to_db_string(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Calendar (year, month) of a timestamp, evaluated in UTC
///
/// Monthly credit grants are idempotent per this key.
pub fn month_key(at: DateTime<Utc>) -> (i32, u32) {
    (at.year(), at.month())
}

/// True when both timestamps fall in the same UTC calendar month
pub fn same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    month_key(a) == month_key(b)
}

/// Same day one month later, clamped to the end of shorter months
///
/// Used for billing period bounds.
pub fn one_month_after(at: DateTime<Utc>) -> DateTime<Utc> {
    at.checked_add_months(Months::new(1)).unwrap_or(at)
}

/// Parse an RFC 3339 timestamp stored as TEXT
pub fn parse_rfc3339(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}
