//! Balance and transaction-log queries
//!
//! The balance row and the log are only ever changed together, inside one
//! transaction owned by the caller. See `services::ledger`.

use chrono::{DateTime, Utc};
use delve_common::time::to_db_string;
use delve_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{enum_col, time_col, uuid_col};
use crate::models::CreditTransaction;

fn transaction_from_row(row: &SqliteRow) -> Result<CreditTransaction> {
    let metadata: Option<String> = row.try_get("metadata")?;
    let metadata = metadata
        .map(|m| serde_json::from_str(&m))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize metadata: {}", e)))?;

    Ok(CreditTransaction {
        id: uuid_col(row, "id")?,
        org_id: uuid_col(row, "org_id")?,
        user_id: row.try_get("user_id")?,
        transaction_type: enum_col(row, "type")?,
        amount: row.try_get("amount")?,
        balance: row.try_get("balance")?,
        description: row.try_get("description")?,
        metadata,
        created_at: time_col(row, "created_at")?,
    })
}

/// Current balance, 0 when the organization has no balance row
pub async fn get_balance<'c, E>(executor: E, org_id: Uuid) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let balance: Option<i64> = sqlx::query_scalar("SELECT balance FROM org_credits WHERE org_id = ?")
        .bind(org_id.to_string())
        .fetch_optional(executor)
        .await?;

    Ok(balance.unwrap_or(0))
}

/// Decrement the balance only if it covers `amount`
///
/// The check and the decrement are one statement, so two concurrent
/// debits can never both pass against the same balance. Returns the new
/// balance, or `None` when funds are insufficient (nothing changed).
pub async fn try_debit(
    conn: &mut SqliteConnection,
    org_id: Uuid,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<Option<i64>> {
    let balance: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE org_credits
        SET balance = balance - ?1, updated_at = ?3
        WHERE org_id = ?2 AND balance >= ?1
        RETURNING balance
        "#,
    )
    .bind(amount)
    .bind(org_id.to_string())
    .bind(to_db_string(now))
    .fetch_optional(conn)
    .await?;

    Ok(balance)
}

/// Increment the balance, creating the row when absent; returns the new balance
pub async fn credit(conn: &mut SqliteConnection, org_id: Uuid, amount: i64, now: DateTime<Utc>) -> Result<i64> {
    let balance: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO org_credits (org_id, balance, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(org_id) DO UPDATE SET
            balance = balance + excluded.balance,
            updated_at = excluded.updated_at
        RETURNING balance
        "#,
    )
    .bind(org_id.to_string())
    .bind(amount)
    .bind(to_db_string(now))
    .fetch_one(conn)
    .await?;

    Ok(balance)
}

pub async fn insert_transaction(conn: &mut SqliteConnection, tx: &CreditTransaction) -> Result<()> {
    let metadata = tx
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize metadata: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO credit_transactions (
            id, org_id, user_id, type, amount, balance, description, metadata, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tx.id.to_string())
    .bind(tx.org_id.to_string())
    .bind(&tx.user_id)
    .bind(tx.transaction_type.as_str())
    .bind(tx.amount)
    .bind(tx.balance)
    .bind(&tx.description)
    .bind(metadata)
    .bind(to_db_string(tx.created_at))
    .execute(conn)
    .await?;

    Ok(())
}

/// Most recent first
pub async fn list_transactions(pool: &SqlitePool, org_id: Uuid, limit: i64) -> Result<Vec<CreditTransaction>> {
    let rows = sqlx::query(
        r#"
        SELECT id, org_id, user_id, type, amount, balance, description, metadata, created_at
        FROM credit_transactions
        WHERE org_id = ?
        ORDER BY seq DESC
        LIMIT ?
        "#,
    )
    .bind(org_id.to_string())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(transaction_from_row).collect()
}
