//! Ledger read endpoints

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::api::AuthUser;
use crate::error::ApiResult;
use crate::models::{CreditTransaction, Permission, PlanId, Role};
use crate::AppState;

const DEFAULT_TRANSACTION_LIMIT: i64 = 20;
const MAX_TRANSACTION_LIMIT: i64 = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub balance: i64,
    pub has_org: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanId>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
}

/// GET /credits/balance
///
/// Attempts the monthly grant first; a failed grant is logged and the
/// balance is still returned.
pub async fn get_balance(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<BalanceResponse>> {
    let Some(membership) = state.organizations.current_organization(user.id).await? else {
        return Ok(Json(BalanceResponse {
            balance: 0,
            has_org: false,
            org_id: None,
            org_name: None,
            role: None,
            user_id: user.id,
            plan: None,
        }));
    };
    let org = membership.organization;

    if let Err(e) = state.subscriptions.grant_monthly_credits(org.id).await {
        warn!(org_id = %org.id, "Monthly credit grant failed: {}", e);
    }

    let balance = state.ledger.get_balance(org.id).await?;
    let plan = state.subscriptions.get_org_plan(org.id).await?;

    Ok(Json(BalanceResponse {
        balance,
        has_org: true,
        org_id: Some(org.id),
        org_name: Some(org.name),
        role: Some(membership.role),
        user_id: user.id,
        plan: Some(plan),
    }))
}

/// GET /credits/transactions?limit=N
pub async fn get_transactions(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Json<Vec<CreditTransaction>>> {
    let Some(membership) = state.organizations.current_organization(user.id).await? else {
        return Ok(Json(Vec::new()));
    };
    let org_id = membership.organization.id;
    state
        .organizations
        .require_permission(user.id, org_id, Permission::CreditsView)
        .await?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_TRANSACTION_LIMIT)
        .clamp(1, MAX_TRANSACTION_LIMIT);
    Ok(Json(state.ledger.get_transactions(org_id, limit).await?))
}

/// Build credits routes
pub fn credits_routes() -> Router<AppState> {
    Router::new()
        .route("/credits/balance", get(get_balance))
        .route("/credits/transactions", get(get_transactions))
}
