//! Subscription / plan resolver
//!
//! Maps an organization to its plan and enforces plan-derived limits:
//! member caps, allowed research types and the monthly credit grant.

use chrono::{DateTime, Utc};
use delve_common::events::{DelveEvent, EventBus};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::plan::UNLIMITED_MEMBERS;
use crate::models::{Actor, OrgSubscription, PlanId, ResearchType, TransactionType};
use crate::services::ledger::{add_in_tx, CreditLedger};
use crate::utils::retry_on_lock;

/// Outcome of a member-cap check
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberAllowance {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<i64>,
}

/// Outcome of a research-type entitlement check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entitlement {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Outcome of a monthly grant attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrantOutcome {
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GrantOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            granted: false,
            amount: None,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionService {
    db: SqlitePool,
    ledger: CreditLedger,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
}

impl SubscriptionService {
    pub fn new(db: SqlitePool, ledger: CreditLedger, event_bus: EventBus, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            ledger,
            event_bus,
            max_lock_wait_ms,
        }
    }

    /// Subscription row, lazily bootstrapping a `free` one if none exists
    pub async fn get_subscription(&self, org_id: Uuid) -> ApiResult<OrgSubscription> {
        if let Some(sub) = db::subscriptions::find_subscription(&self.db, org_id).await? {
            return Ok(sub);
        }

        let fresh = OrgSubscription::new(org_id, PlanId::Free, delve_common::time::now());
        db::subscriptions::insert_subscription_if_absent(&self.db, &fresh).await?;
        debug!(org_id = %org_id, "Bootstrapped free subscription");

        // Re-read: a concurrent bootstrap may have won the insert
        db::subscriptions::find_subscription(&self.db, org_id)
            .await?
            .ok_or_else(|| ApiError::Conflict(format!("Subscription for {} vanished", org_id)))
    }

    pub async fn get_org_plan(&self, org_id: Uuid) -> ApiResult<PlanId> {
        Ok(self.get_subscription(org_id).await?.plan)
    }

    /// Compare the member count with the plan's cap; -1 always allows
    pub async fn can_add_member(&self, org_id: Uuid) -> ApiResult<MemberAllowance> {
        let plan = self.get_org_plan(org_id).await?.plan();
        let cap = plan.features.members;

        if cap == UNLIMITED_MEMBERS {
            return Ok(MemberAllowance {
                allowed: true,
                reason: None,
                limit: None,
                current: None,
            });
        }

        let current = db::organizations::count_members(&self.db, org_id).await?;
        if current >= cap {
            return Ok(MemberAllowance {
                allowed: false,
                reason: Some(format!(
                    "The {} plan supports at most {} members; upgrade to add more",
                    plan.name, cap
                )),
                limit: Some(cap),
                current: Some(current),
            });
        }

        Ok(MemberAllowance {
            allowed: true,
            reason: None,
            limit: Some(cap),
            current: Some(current),
        })
    }

    /// Membership of `research_type` in the plan's allowed set
    ///
    /// Takes the raw tag: an unrecognized type is simply not in any plan.
    pub async fn can_use_research_type(&self, org_id: Uuid, research_type: &str) -> ApiResult<Entitlement> {
        let plan = self.get_org_plan(org_id).await?.plan();

        let parsed = research_type.parse::<ResearchType>().ok();
        if parsed.is_some_and(|t| plan.allows(t)) {
            return Ok(Entitlement {
                allowed: true,
                reason: None,
            });
        }

        let type_name = parsed.map(|t| t.display_name()).unwrap_or(research_type);
        Ok(Entitlement {
            allowed: false,
            reason: Some(format!(
                "The {} plan does not include {}; upgrade to Pro or Enterprise",
                plan.name, type_name
            )),
        })
    }

    /// Grant the plan's monthly credits once per calendar month
    pub async fn grant_monthly_credits(&self, org_id: Uuid) -> ApiResult<GrantOutcome> {
        self.grant_monthly_credits_at(org_id, delve_common::time::now()).await
    }

    /// [`Self::grant_monthly_credits`] evaluated at `now` (UTC months)
    ///
    /// The credit and the last-grant marker commit together. The marker
    /// update is a compare-and-swap on the value read here, so a racing
    /// grant for the same month becomes a no-op instead of a double grant.
    pub async fn grant_monthly_credits_at(&self, org_id: Uuid, now: DateTime<Utc>) -> ApiResult<GrantOutcome> {
        let sub = self.get_subscription(org_id).await?;
        let plan = sub.plan.plan();
        let amount = plan.features.monthly_credits;

        if amount <= 0 {
            return Ok(GrantOutcome::skipped("Plan has no monthly credits"));
        }

        if let Some(last) = sub.last_credit_grant_at {
            if delve_common::time::same_month(last, now) {
                return Ok(GrantOutcome::skipped("Monthly credits already granted"));
            }
        }

        let previous = sub.last_credit_grant_at;
        let balance = retry_on_lock("monthly grant", self.max_lock_wait_ms, || async {
            let mut tx = self.db.begin().await?;
            if !db::subscriptions::mark_granted(&mut tx, org_id, previous, now).await? {
                return Ok(None);
            }
            let balance = add_in_tx(
                &mut tx,
                org_id,
                Actor::System,
                amount,
                TransactionType::Bonus,
                "Monthly plan credits",
                None,
            )
            .await?;
            tx.commit().await?;
            Ok::<_, delve_common::Error>(Some(balance))
        })
        .await?;

        match balance {
            Some(balance) => {
                info!(org_id = %org_id, amount, plan = %sub.plan, "Granted monthly credits");
                self.ledger.publish_change(org_id, balance, amount);
                Ok(GrantOutcome {
                    granted: true,
                    amount: Some(amount),
                    reason: None,
                })
            }
            None => Ok(GrantOutcome::skipped("Monthly credits already granted")),
        }
    }

    /// Overwrite the plan and reset the billing period to [now, now + 1 month]
    ///
    /// No ordering check and no prorating; see [`Self::upgrade_with_bonus`].
    pub async fn upgrade_plan(&self, org_id: Uuid, new_plan: PlanId) -> ApiResult<()> {
        let now = delve_common::time::now();
        retry_on_lock("plan upgrade", self.max_lock_wait_ms, || async {
            let mut conn = self.db.acquire().await?;
            db::subscriptions::set_plan(&mut conn, org_id, new_plan, now).await
        })
        .await?;

        self.publish_org_change(org_id, "plan");
        Ok(())
    }

    /// Owner-facing upgrade: strictly higher plan only, and the new plan's
    /// monthly credits are granted as a bonus in the same transaction
    ///
    /// Returns the bonus amount.
    pub async fn upgrade_with_bonus(&self, org_id: Uuid, actor: Actor, new_plan: PlanId) -> ApiResult<i64> {
        let current = self.get_org_plan(org_id).await?;
        if new_plan <= current {
            return Err(ApiError::Validation(
                "Only upgrades to a higher plan are supported".to_string(),
            ));
        }

        let plan = new_plan.plan();
        let bonus = plan.features.monthly_credits;
        let description = format!("Upgrade to {} bonus", plan.name);
        let now = delve_common::time::now();

        let balance = retry_on_lock("plan upgrade", self.max_lock_wait_ms, || async {
            let mut tx = self.db.begin().await?;
            if !db::subscriptions::swap_plan(&mut tx, org_id, current, new_plan, now).await? {
                return Ok(None);
            }
            let balance = add_in_tx(
                &mut tx,
                org_id,
                actor,
                bonus,
                TransactionType::Bonus,
                &description,
                Some(serde_json::json!({ "plan": new_plan.as_str() })),
            )
            .await?;
            tx.commit().await?;
            Ok::<_, delve_common::Error>(Some(balance))
        })
        .await?;

        // Another upgrade changed the plan after it was read
        let Some(balance) = balance else {
            return Err(ApiError::Validation(
                "Plan changed concurrently; only upgrades to a higher plan are supported".to_string(),
            ));
        };

        info!(org_id = %org_id, from = %current, to = %new_plan, bonus, "Plan upgraded");
        self.ledger.publish_change(org_id, balance, bonus);
        self.publish_org_change(org_id, "plan");
        Ok(bonus)
    }

    fn publish_org_change(&self, org_id: Uuid, reason: &str) {
        self.event_bus.emit_lossy(DelveEvent::OrganizationChanged {
            org_id,
            reason: reason.to_string(),
            timestamp: delve_common::time::now(),
        });
    }
}
