//! Organization invites

use chrono::{DateTime, Utc};
use delve_common::time::to_db_string;
use delve_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{enum_col, opt_time_col, time_col, uuid_col};
use crate::models::OrgInvite;

fn invite_from_row(row: &SqliteRow) -> Result<OrgInvite> {
    Ok(OrgInvite {
        id: uuid_col(row, "id")?,
        org_id: uuid_col(row, "org_id")?,
        code: row.try_get("code")?,
        email: row.try_get("email")?,
        role: enum_col(row, "role")?,
        expires_at: time_col(row, "expires_at")?,
        used_at: opt_time_col(row, "used_at")?,
        created_at: time_col(row, "created_at")?,
    })
}

pub async fn insert_invite(pool: &SqlitePool, invite: &OrgInvite) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO org_invites (id, org_id, code, email, role, expires_at, used_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, NULL, ?)
        "#,
    )
    .bind(invite.id.to_string())
    .bind(invite.org_id.to_string())
    .bind(&invite.code)
    .bind(&invite.email)
    .bind(invite.role.as_str())
    .bind(to_db_string(invite.expires_at))
    .bind(to_db_string(invite.created_at))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_by_code<'c, E>(executor: E, code: &str) -> Result<Option<OrgInvite>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, org_id, code, email, role, expires_at, used_at, created_at FROM org_invites WHERE code = ?",
    )
    .bind(code)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(invite_from_row).transpose()
}

/// Consume an invite; false when it was already used
pub async fn mark_used(conn: &mut SqliteConnection, invite_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let outcome = sqlx::query("UPDATE org_invites SET used_at = ? WHERE id = ? AND used_at IS NULL")
        .bind(to_db_string(now))
        .bind(invite_id.to_string())
        .execute(conn)
        .await?;

    Ok(outcome.rows_affected() == 1)
}
