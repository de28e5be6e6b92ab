//! Research orchestrator integration tests
//!
//! Submission order, atomic charge, background outcomes and deletion rules.

mod helpers;

use delve_server::models::{PlanId, ResearchSession, ResearchStatus, ResearchType, Role, TransactionType};
use delve_server::services::AgentEvent;
use delve_server::ApiError;
use helpers::{completing, test_app, Script};
use uuid::Uuid;

#[tokio::test]
async fn test_comparison_submission_charges_and_completes() {
    let app = test_app(completing("# Rust vs Go")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;
    app.set_plan(org.id, PlanId::Pro).await;
    app.set_balance(org.id, 100).await;

    let submitted = app
        .state
        .orchestrator
        .submit(owner.id, "Compare Rust and Go", "comparison")
        .await
        .unwrap();

    assert_eq!(submitted.credits_used, 30);
    assert_eq!(submitted.status, ResearchStatus::Processing);
    assert_eq!(app.balance(org.id).await, 70);

    let txs = app.state.ledger.get_transactions(org.id, 10).await.unwrap();
    let consumes: Vec<_> = txs
        .iter()
        .filter(|t| t.transaction_type == TransactionType::Consume)
        .collect();
    assert_eq!(consumes.len(), 1);
    assert_eq!(consumes[0].amount, -30);
    assert_eq!(consumes[0].balance, 70);
    let metadata = consumes[0].metadata.as_ref().unwrap();
    assert_eq!(metadata["researchId"], submitted.session_id.to_string());
    assert_eq!(metadata["researchType"], "comparison");

    let session = app.wait_for_terminal(submitted.session_id).await;
    assert_eq!(session.status, ResearchStatus::Completed);
    assert_eq!(session.result.as_deref(), Some("# Rust vs Go"));
    assert_eq!(session.credits_used, 30);
    assert_eq!(session.research_type, ResearchType::Comparison);
    assert!(app.state.orchestrator.progress(submitted.session_id).await.is_none());
}

#[tokio::test]
async fn test_free_plan_rejects_analysis_before_any_write() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;

    let result = app.state.orchestrator.submit(owner.id, "Deep dive", "analysis").await;

    assert!(matches!(result, Err(ApiError::ResearchTypeNotAllowed(_))));
    assert_eq!(app.session_count(org.id).await, 0);
    assert_eq!(app.balance(org.id).await, 500);
}

#[tokio::test]
async fn test_low_balance_rejected_with_required_and_balance() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;
    app.set_balance(org.id, 5).await;

    let result = app.state.orchestrator.submit(owner.id, "Summarize Rust", "summary").await;

    match result {
        Err(ApiError::InsufficientCredits { required, balance }) => {
            assert_eq!(required, 10);
            assert_eq!(balance, 5);
        }
        other => panic!("expected InsufficientCredits, got {:?}", other),
    }
    assert_eq!(app.session_count(org.id).await, 0);
    assert_eq!(app.balance(org.id).await, 5);
}

#[tokio::test]
async fn test_submission_without_organization() {
    let app = test_app(completing("ok")).await;
    let (loner, _) = app.user("loner@example.com").await;

    let result = app.state.orchestrator.submit(loner.id, "Anything", "summary").await;
    assert!(matches!(result, Err(ApiError::NoActiveOrganization)));
}

#[tokio::test]
async fn test_blank_query_is_a_validation_error() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    app.org(owner.id, "acme").await;

    let result = app.state.orchestrator.submit(owner.id, "   ", "summary").await;
    assert!(matches!(result, Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn test_concurrent_submissions_leave_no_orphan_sessions() {
    let app = test_app(Script::Hang).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;
    app.set_balance(org.id, 15).await;

    let mut handles = Vec::new();
    for i in 0..2 {
        let orchestrator = app.state.orchestrator.clone();
        let user_id = owner.id;
        handles.push(tokio::spawn(async move {
            orchestrator.submit(user_id, &format!("query {}", i), "summary").await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(ApiError::InsufficientCredits { required, .. }) => assert_eq!(required, 10),
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(app.session_count(org.id).await, 1);
    assert_eq!(app.balance(org.id).await, 5);
}

async fn submit_summary(script: Script) -> (helpers::TestApp, ResearchSession) {
    let app = test_app(script).await;
    let (owner, _) = app.user("owner@example.com").await;
    app.org(owner.id, "acme").await;

    let submitted = app
        .state
        .orchestrator
        .submit(owner.id, "Summarize Rust", "summary")
        .await
        .unwrap();
    let session = app.wait_for_terminal(submitted.session_id).await;
    (app, session)
}

#[tokio::test]
async fn test_agent_panic_marks_session_failed() {
    let (_app, session) = submit_summary(Script::Panic).await;

    assert_eq!(session.status, ResearchStatus::Failed);
    assert!(session.result.unwrap().contains("agent exploded"));
}

#[tokio::test]
async fn test_agent_failure_message_is_stored() {
    let (_app, session) = submit_summary(Script::Events(vec![AgentEvent::Failed {
        error: "search backend unavailable".to_string(),
    }]))
    .await;

    assert_eq!(session.status, ResearchStatus::Failed);
    assert_eq!(session.result.as_deref(), Some("search backend unavailable"));
}

#[tokio::test]
async fn test_stream_without_verdict_fails() {
    let (_app, session) = submit_summary(Script::Events(vec![AgentEvent::Progress {
        step: "Searching the web...".to_string(),
        progress: 20,
        partial: None,
    }]))
    .await;

    assert_eq!(session.status, ResearchStatus::Failed);
    assert!(session.result.is_some());
}

#[tokio::test]
async fn test_generation_timeout_fails_session() {
    let (_app, session) = submit_summary(Script::Hang).await;

    assert_eq!(session.status, ResearchStatus::Failed);
    assert!(session.result.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_terminal_session_is_never_rewritten() {
    let (app, session) = submit_summary(completing("final report")).await;
    assert_eq!(session.status, ResearchStatus::Completed);

    for status in [ResearchStatus::Failed, ResearchStatus::Completed] {
        let written = delve_server::db::sessions::finish_session(
            &app.state.db,
            session.id,
            status,
            "late write",
            delve_common::time::now(),
        )
        .await
        .unwrap();
        assert!(!written);
    }

    let reloaded = delve_server::db::sessions::load_session(&app.state.db, session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, ResearchStatus::Completed);
    assert_eq!(reloaded.result.as_deref(), Some("final report"));
}

#[tokio::test]
async fn test_failed_research_is_not_refunded() {
    let (app, session) = submit_summary(Script::Panic).await;
    assert_eq!(session.status, ResearchStatus::Failed);
    assert_eq!(app.balance(session.org_id).await, 490);
}

#[tokio::test]
async fn test_delete_permissions() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let (admin, _) = app.user("admin@example.com").await;
    let (member, _) = app.user("member@example.com").await;
    let (outsider, _) = app.user("outsider@example.com").await;
    let org = app.org(owner.id, "acme").await;
    app.add_member(org.id, admin.id, Role::Admin).await;
    app.add_member(org.id, member.id, Role::Member).await;

    let orchestrator = &app.state.orchestrator;
    let owners = orchestrator.submit(owner.id, "owner query", "summary").await.unwrap();
    let members = orchestrator.submit(member.id, "member query", "summary").await.unwrap();
    app.wait_for_terminal(owners.session_id).await;
    app.wait_for_terminal(members.session_id).await;

    // Outsiders and non-creators without delete_all are refused
    assert!(matches!(
        orchestrator.delete_session(outsider.id, members.session_id).await,
        Err(ApiError::Forbidden(_))
    ));
    assert!(matches!(
        orchestrator.delete_session(member.id, owners.session_id).await,
        Err(ApiError::Forbidden(_))
    ));
    assert!(matches!(
        orchestrator.delete_session(admin.id, members.session_id).await,
        Err(ApiError::Forbidden(_))
    ));

    orchestrator.delete_session(member.id, members.session_id).await.unwrap();
    orchestrator.delete_session(owner.id, owners.session_id).await.unwrap();
    assert_eq!(app.session_count(org.id).await, 0);

    assert!(matches!(
        orchestrator.delete_session(owner.id, Uuid::new_v4()).await,
        Err(ApiError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_owner_deletes_any_session() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let (member, _) = app.user("member@example.com").await;
    let org = app.org(owner.id, "acme").await;
    app.add_member(org.id, member.id, Role::Member).await;

    let submitted = app
        .state
        .orchestrator
        .submit(member.id, "member query", "summary")
        .await
        .unwrap();
    app.wait_for_terminal(submitted.session_id).await;

    app.state
        .orchestrator
        .delete_session(owner.id, submitted.session_id)
        .await
        .unwrap();
    assert_eq!(app.session_count(org.id).await, 0);
}

#[tokio::test]
async fn test_get_session_requires_membership() {
    let (app, session) = submit_summary(completing("ok")).await;
    let (outsider, _) = app.user("outsider@example.com").await;

    assert!(matches!(
        app.state.orchestrator.get_session(outsider.id, session.id).await,
        Err(ApiError::Forbidden(_))
    ));
    assert!(matches!(
        app.state.orchestrator.get_session(outsider.id, Uuid::new_v4()).await,
        Err(ApiError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_recover_interrupted_fails_processing_sessions() {
    let app = test_app(Script::Hang).await;
    let (owner, _) = app.user("owner@example.com").await;
    let org = app.org(owner.id, "acme").await;

    let now = delve_common::time::now();
    let stuck = ResearchSession {
        id: Uuid::new_v4(),
        org_id: org.id,
        user_id: owner.id,
        query: "left behind".to_string(),
        research_type: ResearchType::Summary,
        status: ResearchStatus::Processing,
        credits_used: 10,
        result: None,
        created_at: now,
        updated_at: now,
    };
    let mut conn = app.state.db.acquire().await.unwrap();
    delve_server::db::sessions::insert_session(&mut conn, &stuck).await.unwrap();
    drop(conn);

    let recovered = app.state.orchestrator.recover_interrupted().await.unwrap();
    assert_eq!(recovered, 1);

    let reloaded = delve_server::db::sessions::load_session(&app.state.db, stuck.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, ResearchStatus::Failed);
    assert_eq!(
        reloaded.result.as_deref(),
        Some(delve_server::services::orchestrator::INTERRUPTED_MESSAGE)
    );
}
