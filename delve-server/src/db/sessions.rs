//! Research session persistence
//!
//! No business logic: who may read or delete a session is decided by the
//! caller.

use chrono::{DateTime, Utc};
use delve_common::time::to_db_string;
use delve_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{enum_col, time_col, uuid_col};
use crate::models::{HistoryEntry, ResearchSession, ResearchStatus};

const SESSION_COLUMNS: &str =
    "s.id, s.org_id, s.user_id, s.query, s.research_type, s.status, s.credits_used, s.result, s.created_at, s.updated_at";

fn session_from_row(row: &SqliteRow) -> Result<ResearchSession> {
    Ok(ResearchSession {
        id: uuid_col(row, "id")?,
        org_id: uuid_col(row, "org_id")?,
        user_id: uuid_col(row, "user_id")?,
        query: row.try_get("query")?,
        research_type: enum_col(row, "research_type")?,
        status: enum_col(row, "status")?,
        credits_used: row.try_get("credits_used")?,
        result: row.try_get("result")?,
        created_at: time_col(row, "created_at")?,
        updated_at: time_col(row, "updated_at")?,
    })
}

pub async fn insert_session(conn: &mut SqliteConnection, session: &ResearchSession) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO research_sessions (
            id, org_id, user_id, query, research_type, status,
            credits_used, result, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session.id.to_string())
    .bind(session.org_id.to_string())
    .bind(session.user_id.to_string())
    .bind(&session.query)
    .bind(session.research_type.as_str())
    .bind(session.status.as_str())
    .bind(session.credits_used)
    .bind(&session.result)
    .bind(to_db_string(session.created_at))
    .bind(to_db_string(session.updated_at))
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn load_session<'c, E>(executor: E, session_id: Uuid) -> Result<Option<ResearchSession>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM research_sessions s WHERE s.id = ?", SESSION_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(session_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(session_from_row).transpose()
}

/// Move a `processing` session to a terminal status
///
/// Returns false when the session is missing or already terminal; a
/// terminal session is never written again.
pub async fn finish_session(
    pool: &SqlitePool,
    session_id: Uuid,
    status: ResearchStatus,
    result: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    debug_assert!(status.is_terminal());

    let outcome = sqlx::query(
        "UPDATE research_sessions SET status = ?, result = ?, updated_at = ? WHERE id = ? AND status = 'processing'",
    )
    .bind(status.as_str())
    .bind(result)
    .bind(to_db_string(now))
    .bind(session_id.to_string())
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() == 1)
}

pub async fn delete_session(pool: &SqlitePool, session_id: Uuid) -> Result<bool> {
    let outcome = sqlx::query("DELETE FROM research_sessions WHERE id = ?")
        .bind(session_id.to_string())
        .execute(pool)
        .await?;

    Ok(outcome.rows_affected() > 0)
}

/// Most recent sessions of an organization with creator details
pub async fn list_history(pool: &SqlitePool, org_id: Uuid, limit: i64) -> Result<Vec<HistoryEntry>> {
    let sql = format!(
        r#"
        SELECT {}, u.name AS creator_name, u.email AS creator_email
        FROM research_sessions s
        LEFT JOIN users u ON u.id = s.user_id
        WHERE s.org_id = ?
        ORDER BY s.created_at DESC
        LIMIT ?
        "#,
        SESSION_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(org_id.to_string())
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(HistoryEntry {
                session: session_from_row(row)?,
                creator_name: row.try_get("creator_name")?,
                creator_email: row.try_get("creator_email")?,
            })
        })
        .collect()
}

/// Fail every session still marked `processing`
///
/// Only valid at startup, before any background task exists.
pub async fn fail_stale_sessions(pool: &SqlitePool, message: &str, now: DateTime<Utc>) -> Result<u64> {
    let outcome = sqlx::query(
        "UPDATE research_sessions SET status = 'failed', result = ?, updated_at = ? WHERE status = 'processing'",
    )
    .bind(message)
    .bind(to_db_string(now))
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected())
}
