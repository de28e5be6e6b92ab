//! Database queries
//!
//! Plain persistence: no permission or entitlement logic lives here.
//! Functions that must share a transaction take `&mut SqliteConnection`;
//! pass `&mut *tx` from a `sqlx::Transaction`.

pub mod credits;
pub mod invites;
pub mod orders;
pub mod organizations;
pub mod sessions;
pub mod subscriptions;
pub mod users;

use chrono::{DateTime, Utc};
use delve_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

pub(crate) fn uuid_col(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let value: String = row.try_get(column)?;
    Uuid::parse_str(&value)
        .map_err(|e| Error::Internal(format!("Invalid UUID in column {}: {}", column, e)))
}

pub(crate) fn opt_uuid_col(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let value: Option<String> = row.try_get(column)?;
    value
        .map(|v| Uuid::parse_str(&v))
        .transpose()
        .map_err(|e| Error::Internal(format!("Invalid UUID in column {}: {}", column, e)))
}

pub(crate) fn time_col(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.try_get(column)?;
    delve_common::time::parse_rfc3339(&value)
}

pub(crate) fn opt_time_col(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.try_get(column)?;
    value.as_deref().map(delve_common::time::parse_rfc3339).transpose()
}

/// Parse a TEXT column through the type's `FromStr`
pub(crate) fn enum_col<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: FromStr<Err = Error>,
{
    let value: String = row.try_get(column)?;
    // Bad stored data is a server fault, not bad input
    value
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid value in column {}: {}", column, e)))
}
