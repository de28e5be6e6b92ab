//! Plan lookup and upgrade

use axum::{extract::State, routing::get, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{required, AuthUser, ValidJson};
use crate::error::{ApiError, ApiResult};
use crate::models::plan::PlanFeatures;
use crate::models::{Actor, PlanId, Role};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub plan: PlanId,
    pub name: &'static str,
    pub price: i64,
    pub features: &'static PlanFeatures,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UpgradeRequest {
    #[serde(default)]
    pub plan: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeResponse {
    pub success: bool,
    pub plan: PlanId,
    pub bonus_credits: i64,
}

/// GET /subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<SubscriptionResponse>> {
    let membership = state
        .organizations
        .current_organization(user.id)
        .await?
        .ok_or(ApiError::NoActiveOrganization)?;

    let sub = state
        .subscriptions
        .get_subscription(membership.organization.id)
        .await?;
    let plan = sub.plan.plan();

    Ok(Json(SubscriptionResponse {
        plan: plan.id,
        name: plan.name,
        price: plan.price,
        features: &plan.features,
        status: sub.status,
        current_period_start: sub.current_period_start,
        current_period_end: sub.current_period_end,
    }))
}

/// POST /subscription/upgrade
///
/// Owner only. Grants the new plan's monthly credits as a bonus.
pub async fn upgrade(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidJson(request): ValidJson<UpgradeRequest>,
) -> ApiResult<Json<UpgradeResponse>> {
    let plan: PlanId = required(request.plan, "plan")?.parse()?;

    let membership = state
        .organizations
        .current_organization(user.id)
        .await?
        .ok_or(ApiError::NoActiveOrganization)?;
    if membership.role != Role::Owner {
        return Err(ApiError::Forbidden(
            "Only the organization owner can change the plan".to_string(),
        ));
    }

    let bonus = state
        .subscriptions
        .upgrade_with_bonus(membership.organization.id, Actor::User(user.id), plan)
        .await?;

    Ok(Json(UpgradeResponse {
        success: true,
        plan,
        bonus_credits: bonus,
    }))
}

/// Build subscription routes
pub fn subscription_routes() -> Router<AppState> {
    Router::new()
        .route("/subscription", get(get_subscription))
        .route("/subscription/upgrade", post(upgrade))
}
