//! Subscription rows

use chrono::{DateTime, Utc};
use delve_common::time::to_db_string;
use delve_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use uuid::Uuid;

use super::{enum_col, opt_time_col, time_col, uuid_col};
use crate::models::{OrgSubscription, PlanId};

fn subscription_from_row(row: &SqliteRow) -> Result<OrgSubscription> {
    Ok(OrgSubscription {
        org_id: uuid_col(row, "org_id")?,
        plan: enum_col(row, "plan")?,
        status: row.try_get("status")?,
        current_period_start: time_col(row, "current_period_start")?,
        current_period_end: time_col(row, "current_period_end")?,
        last_credit_grant_at: opt_time_col(row, "last_credit_grant_at")?,
        created_at: time_col(row, "created_at")?,
        updated_at: time_col(row, "updated_at")?,
    })
}

pub async fn find_subscription<'c, E>(executor: E, org_id: Uuid) -> Result<Option<OrgSubscription>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT org_id, plan, status, current_period_start, current_period_end,
               last_credit_grant_at, created_at, updated_at
        FROM org_subscriptions
        WHERE org_id = ?
        "#,
    )
    .bind(org_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(subscription_from_row).transpose()
}

/// Insert unless a row already exists; concurrent bootstraps converge on one row
pub async fn insert_subscription_if_absent<'c, E>(executor: E, sub: &OrgSubscription) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO org_subscriptions (
            org_id, plan, status, current_period_start, current_period_end,
            last_credit_grant_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(org_id) DO NOTHING
        "#,
    )
    .bind(sub.org_id.to_string())
    .bind(sub.plan.as_str())
    .bind(&sub.status)
    .bind(to_db_string(sub.current_period_start))
    .bind(to_db_string(sub.current_period_end))
    .bind(sub.last_credit_grant_at.map(to_db_string))
    .bind(to_db_string(sub.created_at))
    .bind(to_db_string(sub.updated_at))
    .execute(executor)
    .await?;

    Ok(())
}

/// Overwrite the plan and reset the billing period to `[now, now + 1 month]`
///
/// Creates the row when absent. The last-grant marker is left untouched.
pub async fn set_plan(conn: &mut SqliteConnection, org_id: Uuid, plan: PlanId, now: DateTime<Utc>) -> Result<()> {
    let fresh = OrgSubscription::new(org_id, plan, now);

    sqlx::query(
        r#"
        INSERT INTO org_subscriptions (
            org_id, plan, status, current_period_start, current_period_end,
            last_credit_grant_at, created_at, updated_at
        ) VALUES (?1, ?2, 'active', ?3, ?4, NULL, ?3, ?3)
        ON CONFLICT(org_id) DO UPDATE SET
            plan = excluded.plan,
            status = 'active',
            current_period_start = excluded.current_period_start,
            current_period_end = excluded.current_period_end,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(org_id.to_string())
    .bind(plan.as_str())
    .bind(to_db_string(fresh.current_period_start))
    .bind(to_db_string(fresh.current_period_end))
    .execute(conn)
    .await?;

    Ok(())
}

/// Move the plan from `from` to `to`, resetting the billing period
///
/// Returns false when the stored plan is no longer `from`; of two concurrent
/// upgrades from the same plan exactly one applies.
pub async fn swap_plan(
    conn: &mut SqliteConnection,
    org_id: Uuid,
    from: PlanId,
    to: PlanId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let fresh = OrgSubscription::new(org_id, to, now);

    let result = sqlx::query(
        r#"
        UPDATE org_subscriptions
        SET plan = ?1, status = 'active', current_period_start = ?2,
            current_period_end = ?3, updated_at = ?2
        WHERE org_id = ?4 AND plan = ?5
        "#,
    )
    .bind(to.as_str())
    .bind(to_db_string(fresh.current_period_start))
    .bind(to_db_string(fresh.current_period_end))
    .bind(org_id.to_string())
    .bind(from.as_str())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Compare-and-swap the last-grant marker
///
/// Succeeds only when the stored marker still equals `previous`, so of two
/// concurrent grants in one month exactly one wins.
pub async fn mark_granted(
    conn: &mut SqliteConnection,
    org_id: Uuid,
    previous: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE org_subscriptions
        SET last_credit_grant_at = ?1, updated_at = ?1
        WHERE org_id = ?2 AND last_credit_grant_at IS ?3
        "#,
    )
    .bind(to_db_string(now))
    .bind(org_id.to_string())
    .bind(previous.map(to_db_string))
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}
