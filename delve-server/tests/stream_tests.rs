//! Progress stream gateway tests

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use delve_server::models::ResearchStatus;
use delve_server::services::{session_frames, StreamFrame};
use futures::StreamExt;
use helpers::{completing, test_app, Script, TestApp};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn frames_for(app: &TestApp, session_id: Uuid, shutdown: CancellationToken) -> impl futures::Stream<Item = StreamFrame> {
    session_frames(
        app.state.db.clone(),
        app.state.orchestrator.progress_registry(),
        app.state.event_bus.subscribe(),
        session_id,
        Duration::from_millis(50),
        shutdown,
    )
}

#[tokio::test]
async fn test_stream_reports_progress_then_done() {
    let gate = Arc::new(Notify::new());
    let app = test_app(Script::Gated {
        gate: gate.clone(),
        result: "# Final report".to_string(),
    })
    .await;
    let (owner, _) = app.user("owner@example.com").await;
    app.org(owner.id, "acme").await;

    let submitted = app
        .state
        .orchestrator
        .submit(owner.id, "Summarize Rust", "summary")
        .await
        .unwrap();

    let mut frames = Box::pin(frames_for(&app, submitted.session_id, CancellationToken::new()));

    let first = frames.next().await.unwrap();
    match first {
        StreamFrame::Progress { status, query, .. } => {
            assert_eq!(status, ResearchStatus::Processing);
            assert_eq!(query, "Summarize Rust");
        }
        other => panic!("expected progress frame, got {:?}", other),
    }

    gate.notify_one();

    let rest: Vec<StreamFrame> = tokio::time::timeout(Duration::from_secs(5), frames.collect())
        .await
        .expect("stream did not close");
    let n = rest.len();
    assert!(n >= 2);
    match &rest[n - 2] {
        StreamFrame::Progress {
            status,
            result,
            has_result,
            ..
        } => {
            assert_eq!(*status, ResearchStatus::Completed);
            assert_eq!(result.as_deref(), Some("# Final report"));
            assert!(*has_result);
        }
        other => panic!("expected final progress frame, got {:?}", other),
    }
    assert_eq!(
        rest[n - 1],
        StreamFrame::Done {
            status: ResearchStatus::Completed
        }
    );
}

#[tokio::test]
async fn test_stream_on_terminal_session_closes_immediately() {
    let app = test_app(completing("done text")).await;
    let (owner, _) = app.user("owner@example.com").await;
    app.org(owner.id, "acme").await;

    let submitted = app
        .state
        .orchestrator
        .submit(owner.id, "Summarize Rust", "summary")
        .await
        .unwrap();
    app.wait_for_terminal(submitted.session_id).await;

    let frames: Vec<StreamFrame> = frames_for(&app, submitted.session_id, CancellationToken::new())
        .collect()
        .await;

    assert_eq!(frames.len(), 2);
    assert!(matches!(frames[1], StreamFrame::Done { status: ResearchStatus::Completed }));
}

#[tokio::test]
async fn test_client_disconnect_releases_subscription() {
    let gate = Arc::new(Notify::new());
    let app = test_app(Script::Gated {
        gate: gate.clone(),
        result: "# Report".to_string(),
    })
    .await;
    let (owner, _) = app.user("owner@example.com").await;
    app.org(owner.id, "acme").await;

    let submitted = app
        .state
        .orchestrator
        .submit(owner.id, "Summarize Rust", "summary")
        .await
        .unwrap();

    let before = app.state.event_bus.subscriber_count();
    let mut frames = Box::pin(frames_for(&app, submitted.session_id, CancellationToken::new()));
    assert!(matches!(frames.next().await, Some(StreamFrame::Progress { .. })));
    assert_eq!(app.state.event_bus.subscriber_count(), before + 1);

    // Client goes away mid-run
    drop(frames);
    assert_eq!(app.state.event_bus.subscriber_count(), before);

    // The run is not tied to the viewer
    gate.notify_one();
    let session = app.wait_for_terminal(submitted.session_id).await;
    assert_eq!(session.status, ResearchStatus::Completed);
    assert_eq!(session.result.as_deref(), Some("# Report"));
}

#[tokio::test]
async fn test_deleted_session_ends_stream_with_error() {
    let app = test_app(Script::Hang).await;
    let (owner, _) = app.user("owner@example.com").await;
    app.org(owner.id, "acme").await;

    let submitted = app
        .state
        .orchestrator
        .submit(owner.id, "Summarize Rust", "summary")
        .await
        .unwrap();

    let mut frames = Box::pin(frames_for(&app, submitted.session_id, CancellationToken::new()));
    assert!(matches!(frames.next().await, Some(StreamFrame::Progress { .. })));

    app.state
        .orchestrator
        .delete_session(owner.id, submitted.session_id)
        .await
        .unwrap();

    let rest: Vec<StreamFrame> = tokio::time::timeout(Duration::from_secs(5), frames.collect())
        .await
        .expect("stream did not close");
    assert_eq!(
        rest.last(),
        Some(&StreamFrame::Error {
            message: "Session not found".to_string()
        })
    );
}

#[tokio::test]
async fn test_shutdown_closes_open_streams() {
    let app = test_app(Script::Hang).await;
    let (owner, _) = app.user("owner@example.com").await;
    app.org(owner.id, "acme").await;

    let submitted = app
        .state
        .orchestrator
        .submit(owner.id, "Summarize Rust", "summary")
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let mut frames = Box::pin(frames_for(&app, submitted.session_id, shutdown.clone()));
    assert!(matches!(frames.next().await, Some(StreamFrame::Progress { .. })));

    shutdown.cancel();
    let rest: Vec<StreamFrame> = tokio::time::timeout(Duration::from_secs(5), frames.collect())
        .await
        .expect("stream did not close");
    assert!(matches!(rest.last(), Some(StreamFrame::Error { .. })));
}

#[tokio::test]
async fn test_stream_endpoint_emits_sse_frames() {
    let app = test_app(completing("sse body")).await;
    let (owner, token) = app.user("owner@example.com").await;
    app.org(owner.id, "acme").await;

    let submitted = app
        .state
        .orchestrator
        .submit(owner.id, "Summarize Rust", "summary")
        .await
        .unwrap();
    app.wait_for_terminal(submitted.session_id).await;

    let (status, body) = app
        .send_raw(
            "GET",
            &format!("/research/{}/stream", submitted.session_id),
            Some(&token),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("\"type\":\"progress\""));
    assert!(text.contains("\"hasResult\":true"));
    assert!(text.contains("\"type\":\"done\""));
}

#[tokio::test]
async fn test_stream_endpoint_checks_access_at_open() {
    let app = test_app(completing("ok")).await;
    let (owner, _) = app.user("owner@example.com").await;
    let (_, outsider_token) = app.user("outsider@example.com").await;
    app.org(owner.id, "acme").await;

    let submitted = app
        .state
        .orchestrator
        .submit(owner.id, "Summarize Rust", "summary")
        .await
        .unwrap();

    let (status, _) = app
        .send("GET", &format!("/research/{}/stream", submitted.session_id), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(
            "GET",
            &format!("/research/{}/stream", submitted.session_id),
            Some(&outsider_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _) = app
        .send(
            "GET",
            &format!("/research/{}/stream", Uuid::new_v4()),
            Some(&outsider_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
