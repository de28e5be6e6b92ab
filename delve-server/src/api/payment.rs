//! Payment stub endpoints

use axum::{
    extract::{Query, State},
    response::Html,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::api::{required, required_id, AuthUser, ValidJson};
use crate::error::{ApiError, ApiResult};
use crate::models::{OrderStatus, Permission};
use crate::services::payment::CreatedOrder;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub package_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderQuery {
    pub order_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub credits: i64,
    pub amount: i64,
    pub paid_at: Option<DateTime<Utc>>,
}

/// POST /payment/wechat/create
pub async fn create_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidJson(request): ValidJson<CreateOrderRequest>,
) -> ApiResult<Json<CreatedOrder>> {
    let package_id = required(request.package_id, "packageId")?;

    let membership = state
        .organizations
        .current_organization(user.id)
        .await?
        .ok_or(ApiError::NoActiveOrganization)?;
    let org_id = membership.organization.id;
    state
        .organizations
        .require_permission(user.id, org_id, Permission::CreditsPurchase)
        .await?;

    Ok(Json(state.payments.create_order(org_id, user.id, &package_id).await?))
}

/// GET /payment/wechat/mock-confirm?orderId=
///
/// Development-only stand-in for the provider callback; no verification.
pub async fn mock_confirm(
    State(state): State<AppState>,
    Query(query): Query<OrderQuery>,
) -> ApiResult<Html<String>> {
    if !state.config.payments.mock_confirm_enabled {
        return Err(ApiError::NotFound("Mock payment confirmation is disabled".to_string()));
    }

    let order_id = required_id(query.order_id, "orderId")?;
    warn!(order_id = %order_id, "Confirming order through mock payment shortcut");
    let order = state.payments.confirm(order_id).await?;

    Ok(Html(format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Payment confirmed</title></head>\
         <body><h1>Payment confirmed</h1><p>{} credits were added to your organization.</p></body></html>",
        order.credits
    )))
}

/// GET /payment/wechat/status?orderId=
pub async fn order_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<OrderQuery>,
) -> ApiResult<Json<OrderStatusResponse>> {
    let order_id = required_id(query.order_id, "orderId")?;
    let order = state.payments.get_order(order_id).await?;
    state.organizations.require_member(user.id, order.org_id).await?;

    Ok(Json(OrderStatusResponse {
        order_id: order.id,
        status: order.status,
        credits: order.credits,
        amount: order.amount,
        paid_at: order.paid_at,
    }))
}

/// Build payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/payment/wechat/create", post(create_order))
        .route("/payment/wechat/mock-confirm", get(mock_confirm))
        .route("/payment/wechat/status", get(order_status))
}
