//! Users

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// Organization new requests are scoped to
    pub active_org_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
