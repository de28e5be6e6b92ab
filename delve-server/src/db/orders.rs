//! Purchase orders

use chrono::{DateTime, Utc};
use delve_common::time::to_db_string;
use delve_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{enum_col, opt_time_col, time_col, uuid_col};
use crate::models::Order;

fn order_from_row(row: &SqliteRow) -> Result<Order> {
    Ok(Order {
        id: uuid_col(row, "id")?,
        org_id: uuid_col(row, "org_id")?,
        user_id: uuid_col(row, "user_id")?,
        package_id: row.try_get("package_id")?,
        status: enum_col(row, "status")?,
        amount: row.try_get("amount")?,
        credits: row.try_get("credits")?,
        provider: row.try_get("provider")?,
        provider_order_id: row.try_get("provider_order_id")?,
        qrcode_url: row.try_get("qrcode_url")?,
        paid_at: opt_time_col(row, "paid_at")?,
        created_at: time_col(row, "created_at")?,
    })
}

pub async fn insert_order(pool: &SqlitePool, order: &Order) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, org_id, user_id, package_id, status, amount, credits,
            provider, provider_order_id, qrcode_url, paid_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
        "#,
    )
    .bind(order.id.to_string())
    .bind(order.org_id.to_string())
    .bind(order.user_id.to_string())
    .bind(&order.package_id)
    .bind(order.status.as_str())
    .bind(order.amount)
    .bind(order.credits)
    .bind(&order.provider)
    .bind(&order.provider_order_id)
    .bind(&order.qrcode_url)
    .bind(to_db_string(order.created_at))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_order<'c, E>(executor: E, order_id: Uuid) -> Result<Option<Order>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT id, org_id, user_id, package_id, status, amount, credits,
               provider, provider_order_id, qrcode_url, paid_at, created_at
        FROM orders
        WHERE id = ?
        "#,
    )
    .bind(order_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(order_from_row).transpose()
}

/// Move a pending order to paid; false when it was already paid
pub async fn mark_paid(conn: &mut SqliteConnection, order_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let outcome = sqlx::query("UPDATE orders SET status = 'paid', paid_at = ? WHERE id = ? AND status = 'pending'")
        .bind(to_db_string(now))
        .bind(order_id.to_string())
        .execute(conn)
        .await?;

    Ok(outcome.rows_affected() == 1)
}
