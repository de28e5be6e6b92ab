//! Credit ledger integration tests
//!
//! Balance and transaction log must move together, and a debit must never
//! take a balance below zero, including under concurrent consumption.

mod helpers;

use delve_server::models::{Actor, TransactionType};
use delve_server::ApiError;
use helpers::{completing, test_app};
use uuid::Uuid;

#[tokio::test]
async fn test_new_organization_starts_with_free_credits() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;

    assert_eq!(app.balance(org.id).await, 500);

    let txs = app.state.ledger.get_transactions(org.id, 10).await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].transaction_type, TransactionType::Bonus);
    assert_eq!(txs[0].amount, 500);
    assert_eq!(txs[0].balance, 500);
}

#[tokio::test]
async fn test_unknown_org_balance_is_zero() {
    let app = test_app(completing("ok")).await;
    assert_eq!(app.state.ledger.get_balance(Uuid::new_v4()).await.unwrap(), 0);
    assert!(!app.state.ledger.check_balance(Uuid::new_v4(), 1).await.unwrap());
}

#[tokio::test]
async fn test_consume_decrements_and_logs_snapshot() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;

    let balance = app
        .state
        .ledger
        .consume(org.id, Actor::User(owner.id), 30, "Research: comparison", None)
        .await
        .unwrap();

    assert_eq!(balance, 470);
    assert_eq!(app.balance(org.id).await, 470);

    let latest = &app.state.ledger.get_transactions(org.id, 1).await.unwrap()[0];
    assert_eq!(latest.transaction_type, TransactionType::Consume);
    assert_eq!(latest.amount, -30);
    assert_eq!(latest.balance, 470);
    assert_eq!(latest.user_id, owner.id.to_string());
}

#[tokio::test]
async fn test_consume_more_than_balance_fails_without_side_effects() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;
    app.set_balance(org.id, 20).await;

    let result = app
        .state
        .ledger
        .consume(org.id, Actor::User(owner.id), 30, "too much", None)
        .await;

    match result {
        Err(ApiError::InsufficientCredits { required, balance }) => {
            assert_eq!(required, 30);
            assert_eq!(balance, 20);
        }
        other => panic!("expected InsufficientCredits, got {:?}", other),
    }
    assert_eq!(app.balance(org.id).await, 20);
    assert_eq!(app.state.ledger.get_transactions(org.id, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_consume_rejects_non_positive_amount() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;

    let result = app.state.ledger.consume(org.id, Actor::System, 0, "nothing", None).await;
    assert!(matches!(result, Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn test_add_increments_and_records_type() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;

    let balance = app
        .state
        .ledger
        .add(
            org.id,
            Actor::User(owner.id),
            1000,
            TransactionType::Purchase,
            "Purchased 1000 credits",
            Some(serde_json::json!({ "orderId": "o-1" })),
        )
        .await
        .unwrap();

    assert_eq!(balance, 1500);
    let latest = &app.state.ledger.get_transactions(org.id, 1).await.unwrap()[0];
    assert_eq!(latest.transaction_type, TransactionType::Purchase);
    assert_eq!(latest.amount, 1000);
    assert_eq!(latest.balance, 1500);
    assert_eq!(latest.metadata.as_ref().unwrap()["orderId"], "o-1");
}

#[tokio::test]
async fn test_add_rejects_consume_type() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;

    let result = app
        .state
        .ledger
        .add(org.id, Actor::System, 10, TransactionType::Consume, "wrong", None)
        .await;
    assert!(matches!(result, Err(ApiError::Validation(_))));
    assert_eq!(app.balance(org.id).await, 500);
}

#[tokio::test]
async fn test_transactions_are_most_recent_first_and_limited() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;

    for amount in [10, 20, 30] {
        app.state
            .ledger
            .consume(org.id, Actor::User(owner.id), amount, "step", None)
            .await
            .unwrap();
    }

    let txs = app.state.ledger.get_transactions(org.id, 2).await.unwrap();
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0].amount, -30);
    assert_eq!(txs[0].balance, 440);
    assert_eq!(txs[1].amount, -20);
    assert_eq!(txs[1].balance, 470);
}

#[tokio::test]
async fn test_concurrent_consumption_never_overdraws() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;
    app.set_balance(org.id, 100).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let ledger = app.state.ledger.clone();
        let org_id = org.id;
        let actor = Actor::User(owner.id);
        handles.push(tokio::spawn(async move {
            ledger.consume(org_id, actor, 60, "race", None).await
        }));
    }

    let mut succeeded = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(balance) => {
                assert_eq!(balance, 40);
                succeeded += 1;
            }
            Err(ApiError::InsufficientCredits { required, .. }) => {
                assert_eq!(required, 60);
                insufficient += 1;
            }
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(insufficient, 1);
    assert_eq!(app.balance(org.id).await, 40);

    let consumes = app
        .state
        .ledger
        .get_transactions(org.id, 10)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.transaction_type == TransactionType::Consume)
        .count();
    assert_eq!(consumes, 1);
}
