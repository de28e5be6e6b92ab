//! Organizations and memberships

use delve_common::time::to_db_string;
use delve_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{enum_col, time_col, uuid_col};
use crate::models::{MemberInfo, OrgMembership, Organization, Role};

fn organization_from_row(row: &SqliteRow) -> Result<Organization> {
    Ok(Organization {
        id: uuid_col(row, "id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        created_at: time_col(row, "created_at")?,
        updated_at: time_col(row, "updated_at")?,
    })
}

pub async fn insert_organization(conn: &mut SqliteConnection, org: &Organization) -> Result<()> {
    sqlx::query("INSERT INTO organizations (id, name, slug, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
        .bind(org.id.to_string())
        .bind(&org.name)
        .bind(&org.slug)
        .bind(to_db_string(org.created_at))
        .bind(to_db_string(org.updated_at))
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn find_organization<'c, E>(executor: E, org_id: Uuid) -> Result<Option<Organization>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row = sqlx::query("SELECT id, name, slug, created_at, updated_at FROM organizations WHERE id = ?")
        .bind(org_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(organization_from_row).transpose()
}

pub async fn slug_exists<'c, E>(executor: E, slug: &str) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM organizations WHERE slug = ?")
        .bind(slug)
        .fetch_one(executor)
        .await?;

    Ok(count > 0)
}

pub async fn insert_member(
    conn: &mut SqliteConnection,
    org_id: Uuid,
    user_id: Uuid,
    role: Role,
) -> Result<()> {
    sqlx::query("INSERT INTO org_members (id, org_id, user_id, role, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(org_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .bind(to_db_string(delve_common::time::now()))
        .execute(conn)
        .await?;

    Ok(())
}

/// Insert a membership only while the organization is below `limit`
///
/// The count and the insert are one statement, so concurrent joins cannot
/// overshoot the cap. `None` means no cap. Returns false when full.
pub async fn insert_member_within_cap(
    conn: &mut SqliteConnection,
    org_id: Uuid,
    user_id: Uuid,
    role: Role,
    limit: Option<i64>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO org_members (id, org_id, user_id, role, created_at)
        SELECT ?1, ?2, ?3, ?4, ?5
        WHERE ?6 IS NULL OR (SELECT COUNT(*) FROM org_members WHERE org_id = ?2) < ?6
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(org_id.to_string())
    .bind(user_id.to_string())
    .bind(role.as_str())
    .bind(to_db_string(delve_common::time::now()))
    .bind(limit)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Role of `user_id` in `org_id`, `None` when not a member
pub async fn member_role<'c, E>(executor: E, user_id: Uuid, org_id: Uuid) -> Result<Option<Role>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let role: Option<String> = sqlx::query_scalar("SELECT role FROM org_members WHERE user_id = ? AND org_id = ?")
        .bind(user_id.to_string())
        .bind(org_id.to_string())
        .fetch_optional(executor)
        .await?;

    role.map(|r| r.parse()).transpose()
}

pub async fn count_members<'c, E>(executor: E, org_id: Uuid) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM org_members WHERE org_id = ?")
        .bind(org_id.to_string())
        .fetch_one(executor)
        .await?;

    Ok(count)
}

/// Every organization the user belongs to, most recently joined first
pub async fn memberships_for_user(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<OrgMembership>> {
    let rows = sqlx::query(
        r#"
        SELECT o.id, o.name, o.slug, o.created_at, o.updated_at,
               m.role, m.created_at AS joined_at
        FROM org_members m
        JOIN organizations o ON o.id = m.org_id
        WHERE m.user_id = ?
        ORDER BY m.created_at DESC
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(OrgMembership {
                organization: organization_from_row(row)?,
                role: enum_col(row, "role")?,
                joined_at: time_col(row, "joined_at")?,
            })
        })
        .collect()
}

/// Members with user details, owner first then by join time
pub async fn list_members(pool: &SqlitePool, org_id: Uuid) -> Result<Vec<MemberInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT u.id AS user_id, u.name, u.email, m.role, m.created_at AS joined_at
        FROM org_members m
        JOIN users u ON u.id = m.user_id
        WHERE m.org_id = ?
        ORDER BY CASE m.role WHEN 'owner' THEN 0 WHEN 'admin' THEN 1 ELSE 2 END, m.created_at
        "#,
    )
    .bind(org_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(MemberInfo {
                user_id: uuid_col(row, "user_id")?,
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                role: enum_col(row, "role")?,
                joined_at: time_col(row, "joined_at")?,
            })
        })
        .collect()
}

/// Delete a non-owner membership; returns false when nothing matched
pub async fn delete_member(conn: &mut SqliteConnection, org_id: Uuid, user_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM org_members WHERE org_id = ? AND user_id = ? AND role != 'owner'")
        .bind(org_id.to_string())
        .bind(user_id.to_string())
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Change a non-owner member's role; returns false when nothing matched
pub async fn update_member_role(pool: &SqlitePool, org_id: Uuid, user_id: Uuid, role: Role) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE org_members SET role = ? WHERE org_id = ? AND user_id = ? AND role != 'owner'",
    )
    .bind(role.as_str())
    .bind(org_id.to_string())
    .bind(user_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Clear `active_org_id` for a user whose active org is `org_id`
pub async fn clear_active_org(conn: &mut SqliteConnection, user_id: Uuid, org_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE users SET active_org_id = NULL WHERE id = ? AND active_org_id = ?")
        .bind(user_id.to_string())
        .bind(org_id.to_string())
        .execute(conn)
        .await?;

    Ok(())
}
