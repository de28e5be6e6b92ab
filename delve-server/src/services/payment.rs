//! Payment stub
//!
//! Orders are created against a mock provider. Confirmation normally comes
//! from the provider's callback; here `confirm` is invoked by the
//! development-only mock-confirm route.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::plan::find_package;
use crate::models::{Actor, Order, OrderStatus, TransactionType};
use crate::services::ledger::{add_in_tx, CreditLedger};
use crate::utils::retry_on_lock;

const PROVIDER: &str = "wechat";

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Response to order creation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order_id: Uuid,
    pub amount: i64,
    pub credits: i64,
    pub qrcode_url: String,
    pub mock_confirm_url: String,
}

#[derive(Clone)]
pub struct PaymentService {
    db: SqlitePool,
    ledger: CreditLedger,
    max_lock_wait_ms: u64,
}

impl PaymentService {
    pub fn new(db: SqlitePool, ledger: CreditLedger, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            ledger,
            max_lock_wait_ms,
        }
    }

    /// Create a pending order for a credit package
    pub async fn create_order(&self, org_id: Uuid, user_id: Uuid, package_id: &str) -> ApiResult<CreatedOrder> {
        let package = find_package(package_id)
            .ok_or_else(|| ApiError::Validation(format!("Unknown credit package: {}", package_id)))?;

        let now = delve_common::time::now();
        let order = Order {
            id: Uuid::new_v4(),
            org_id,
            user_id,
            package_id: package.id.to_string(),
            status: OrderStatus::Pending,
            amount: package.price,
            credits: package.total_credits(),
            provider: PROVIDER.to_string(),
            provider_order_id: format!("WX{}{}", now.timestamp_millis(), random_suffix(6)),
            qrcode_url: format!(
                "https://api.qrserver.com/v1/create-qr-code/?size=200x200&data=MOCK_PAY_{}",
                random_suffix(8)
            ),
            paid_at: None,
            created_at: now,
        };
        db::orders::insert_order(&self.db, &order).await?;

        info!(order_id = %order.id, org_id = %org_id, package = package.id, "Payment order created");

        Ok(CreatedOrder {
            order_id: order.id,
            amount: order.amount,
            credits: order.credits,
            mock_confirm_url: format!("/payment/wechat/mock-confirm?orderId={}", order.id),
            qrcode_url: order.qrcode_url,
        })
    }

    /// Mark an order paid and credit its organization
    ///
    /// Idempotent: the status flip is guarded on `pending` and commits with
    /// the ledger entry, so a repeated confirmation credits nothing.
    pub async fn confirm(&self, order_id: Uuid) -> ApiResult<Order> {
        let order = db::orders::find_order(&self.db, order_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;

        if order.status == OrderStatus::Paid {
            return Ok(order);
        }

        let now = delve_common::time::now();
        let description = format!("Purchased {} credits", order.credits);
        let balance = retry_on_lock("order confirm", self.max_lock_wait_ms, || async {
            let mut tx = self.db.begin().await?;
            if !db::orders::mark_paid(&mut tx, order.id, now).await? {
                return Ok(None);
            }
            let balance = add_in_tx(
                &mut tx,
                order.org_id,
                Actor::User(order.user_id),
                order.credits,
                TransactionType::Purchase,
                &description,
                Some(serde_json::json!({ "orderId": order.id, "packageId": order.package_id })),
            )
            .await?;
            tx.commit().await?;
            Ok::<_, delve_common::Error>(Some(balance))
        })
        .await?;

        if let Some(balance) = balance {
            info!(order_id = %order.id, org_id = %order.org_id, credits = order.credits, "Payment confirmed");
            self.ledger.publish_change(order.org_id, balance, order.credits);
        }

        db::orders::find_order(&self.db, order_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))
    }

    pub async fn get_order(&self, order_id: Uuid) -> ApiResult<Order> {
        db::orders::find_order(&self.db, order_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))
    }
}
