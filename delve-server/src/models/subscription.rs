//! Organization subscriptions

use super::plan::PlanId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// 1:1 satellite of an organization
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgSubscription {
    pub org_id: Uuid,
    pub plan: PlanId,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    /// Guards the once-per-calendar-month grant
    pub last_credit_grant_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrgSubscription {
    /// Fresh active subscription with a one-month period starting at `now`
    pub fn new(org_id: Uuid, plan: PlanId, now: DateTime<Utc>) -> Self {
        Self {
            org_id,
            plan,
            status: "active".to_string(),
            current_period_start: now,
            current_period_end: delve_common::time::one_month_after(now),
            last_credit_grant_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
