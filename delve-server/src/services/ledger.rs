//! Credit ledger
//!
//! Append-only transaction log plus a running balance per organization.
//! Every balance mutation writes exactly one transaction row in the same
//! database transaction, and the row's `balance` snapshot is the value the
//! mutation returned. A debit is a single conditional `UPDATE`, so the
//! balance check and the decrement cannot be split by a concurrent debit.

use delve_common::events::{DelveEvent, EventBus};
use delve_common::Result;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{Actor, CreditTransaction, TransactionType};
use crate::utils::retry_on_lock;

/// Debit `amount` inside a caller-owned transaction
///
/// Returns the new balance, or `None` when the balance does not cover the
/// amount; in that case nothing was written.
pub async fn consume_in_tx(
    conn: &mut SqliteConnection,
    org_id: Uuid,
    actor: Actor,
    amount: i64,
    description: &str,
    metadata: Option<serde_json::Value>,
) -> Result<Option<i64>> {
    let now = delve_common::time::now();

    let Some(balance) = db::credits::try_debit(&mut *conn, org_id, amount, now).await? else {
        return Ok(None);
    };

    let entry = CreditTransaction {
        id: Uuid::new_v4(),
        org_id,
        user_id: actor.to_string(),
        transaction_type: TransactionType::Consume,
        amount: -amount,
        balance,
        description: description.to_string(),
        metadata,
        created_at: now,
    };
    db::credits::insert_transaction(&mut *conn, &entry).await?;

    Ok(Some(balance))
}

/// Credit `amount` inside a caller-owned transaction; returns the new balance
pub async fn add_in_tx(
    conn: &mut SqliteConnection,
    org_id: Uuid,
    actor: Actor,
    amount: i64,
    transaction_type: TransactionType,
    description: &str,
    metadata: Option<serde_json::Value>,
) -> Result<i64> {
    let now = delve_common::time::now();
    let balance = db::credits::credit(&mut *conn, org_id, amount, now).await?;

    let entry = CreditTransaction {
        id: Uuid::new_v4(),
        org_id,
        user_id: actor.to_string(),
        transaction_type,
        amount,
        balance,
        description: description.to_string(),
        metadata,
        created_at: now,
    };
    db::credits::insert_transaction(&mut *conn, &entry).await?;

    Ok(balance)
}

/// Credit ledger service
#[derive(Clone)]
pub struct CreditLedger {
    db: SqlitePool,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
}

impl CreditLedger {
    pub fn new(db: SqlitePool, event_bus: EventBus, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            event_bus,
            max_lock_wait_ms,
        }
    }

    /// Current balance, 0 if no record exists
    pub async fn get_balance(&self, org_id: Uuid) -> ApiResult<i64> {
        Ok(db::credits::get_balance(&self.db, org_id).await?)
    }

    /// Advisory check; `consume` is the authoritative one
    pub async fn check_balance(&self, org_id: Uuid, amount: i64) -> ApiResult<bool> {
        Ok(self.get_balance(org_id).await? >= amount)
    }

    /// Atomically debit `amount` and append a `consume` entry
    ///
    /// Fails with `InsufficientCredits` (balance unchanged) when the current
    /// balance is below `amount`.
    pub async fn consume(
        &self,
        org_id: Uuid,
        actor: Actor,
        amount: i64,
        description: &str,
        metadata: Option<serde_json::Value>,
    ) -> ApiResult<i64> {
        if amount <= 0 {
            return Err(ApiError::Validation("Amount must be positive".to_string()));
        }

        let outcome = retry_on_lock("credit consume", self.max_lock_wait_ms, || async {
            let mut tx = self.db.begin().await?;
            let balance =
                consume_in_tx(&mut tx, org_id, actor, amount, description, metadata.clone()).await?;
            if balance.is_some() {
                tx.commit().await?;
            }
            Ok::<_, delve_common::Error>(balance)
        })
        .await?;

        match outcome {
            Some(balance) => {
                debug!(org_id = %org_id, amount, balance, "Credits consumed");
                self.publish_change(org_id, balance, -amount);
                Ok(balance)
            }
            None => Err(ApiError::InsufficientCredits {
                required: amount,
                balance: self.get_balance(org_id).await?,
            }),
        }
    }

    /// Atomically credit `amount` (creating the balance row if absent) and
    /// append an entry of `transaction_type`
    pub async fn add(
        &self,
        org_id: Uuid,
        actor: Actor,
        amount: i64,
        transaction_type: TransactionType,
        description: &str,
        metadata: Option<serde_json::Value>,
    ) -> ApiResult<i64> {
        if amount <= 0 {
            return Err(ApiError::Validation("Amount must be positive".to_string()));
        }
        if transaction_type == TransactionType::Consume {
            return Err(ApiError::Validation(
                "Consumption must go through consume".to_string(),
            ));
        }

        let balance = retry_on_lock("credit add", self.max_lock_wait_ms, || async {
            let mut tx = self.db.begin().await?;
            let balance = add_in_tx(
                &mut tx,
                org_id,
                actor,
                amount,
                transaction_type,
                description,
                metadata.clone(),
            )
            .await?;
            tx.commit().await?;
            Ok::<_, delve_common::Error>(balance)
        })
        .await?;

        info!(
            org_id = %org_id,
            amount,
            balance,
            kind = transaction_type.as_str(),
            "Credits added"
        );
        self.publish_change(org_id, balance, amount);
        Ok(balance)
    }

    /// Most recent first
    pub async fn get_transactions(&self, org_id: Uuid, limit: i64) -> ApiResult<Vec<CreditTransaction>> {
        Ok(db::credits::list_transactions(&self.db, org_id, limit).await?)
    }

    /// Notify subscribers of a committed balance change
    pub fn publish_change(&self, org_id: Uuid, balance: i64, delta: i64) {
        self.event_bus.emit_lossy(DelveEvent::CreditsChanged {
            org_id,
            balance,
            delta,
            timestamp: delve_common::time::now(),
        });
    }
}
