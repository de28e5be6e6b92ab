//! Users and opaque session tokens

use chrono::{DateTime, Utc};
use delve_common::time::to_db_string;
use delve_common::Result;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{opt_uuid_col, time_col, uuid_col};
use crate::models::User;

const TOKEN_LEN: usize = 48;

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: uuid_col(row, "id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        active_org_id: opt_uuid_col(row, "active_org_id")?,
        created_at: time_col(row, "created_at")?,
    })
}

/// Insert a user; fails on duplicate email
pub async fn create_user(pool: &SqlitePool, email: &str, name: &str) -> Result<User> {
    let user = User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        name: name.to_string(),
        active_org_id: None,
        created_at: delve_common::time::now(),
    };

    sqlx::query("INSERT INTO users (id, email, name, active_org_id, created_at) VALUES (?, ?, ?, NULL, ?)")
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.name)
        .bind(to_db_string(user.created_at))
        .execute(pool)
        .await?;

    Ok(user)
}

pub async fn find_user<'c, E>(executor: E, user_id: Uuid) -> Result<Option<User>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row = sqlx::query("SELECT id, email, name, active_org_id, created_at FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn find_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query("SELECT id, email, name, active_org_id, created_at FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(user_from_row).transpose()
}

/// Issue a new random session token
pub async fn create_token(
    pool: &SqlitePool,
    user_id: Uuid,
    expires_at: Option<DateTime<Utc>>,
) -> Result<String> {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect();

    sqlx::query("INSERT INTO auth_tokens (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&token)
        .bind(user_id.to_string())
        .bind(to_db_string(delve_common::time::now()))
        .bind(expires_at.map(to_db_string))
        .execute(pool)
        .await?;

    Ok(token)
}

/// Resolve a token to its user; unknown or expired tokens resolve to `None`
pub async fn user_for_token(pool: &SqlitePool, token: &str, now: DateTime<Utc>) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT u.id, u.email, u.name, u.active_org_id, u.created_at
        FROM auth_tokens t
        JOIN users u ON u.id = t.user_id
        WHERE t.token = ? AND (t.expires_at IS NULL OR t.expires_at > ?)
        "#,
    )
    .bind(token)
    .bind(to_db_string(now))
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn set_active_org<'c, E>(executor: E, user_id: Uuid, org_id: Option<Uuid>) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("UPDATE users SET active_org_id = ? WHERE id = ?")
        .bind(org_id.map(|id| id.to_string()))
        .bind(user_id.to_string())
        .execute(executor)
        .await?;

    Ok(())
}
