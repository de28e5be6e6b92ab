//! Shared fixtures for delve-server integration tests
//!
//! Each test gets its own SQLite file in a temp directory and an
//! `AppState` whose research agent follows a fixed script.

#![allow(dead_code)]

use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use delve_common::config::TomlConfig;
use delve_server::models::{Organization, PlanId, ResearchSession, User};
use delve_server::services::agent::AgentStream;
use delve_server::services::{AgentEvent, AgentError, ResearchAgent, ResearchRequest};
use delve_server::AppState;
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Notify;
use tower::util::ServiceExt;
use uuid::Uuid;

/// Behaviour of [`ScriptedAgent`]
#[derive(Clone)]
pub enum Script {
    /// Yield these events in order, then end
    Events(Vec<AgentEvent>),
    /// Panic on first poll
    Panic,
    /// Never yield anything
    Hang,
    /// One progress event, then `Completed(result)` once the gate is notified
    Gated { gate: Arc<Notify>, result: String },
}

/// Research agent that replays a [`Script`] for every session
pub struct ScriptedAgent {
    script: Script,
}

impl ScriptedAgent {
    pub fn new(script: Script) -> Self {
        Self { script }
    }
}

impl ResearchAgent for ScriptedAgent {
    fn run(&self, _request: ResearchRequest) -> AgentStream {
        match self.script.clone() {
            Script::Events(events) => futures::stream::iter(events.into_iter().map(Ok::<_, AgentError>)).boxed(),
            Script::Panic => futures::stream::poll_fn(
                |_| -> Poll<Option<Result<AgentEvent, AgentError>>> { panic!("agent exploded") },
            )
            .boxed(),
            Script::Hang => futures::stream::pending::<Result<AgentEvent, AgentError>>().boxed(),
            Script::Gated { gate, result } => Box::pin(async_stream::stream! {
                yield Ok(AgentEvent::Progress {
                    step: "Searching the web...".to_string(),
                    progress: 20,
                    partial: Some("partial notes".to_string()),
                });
                gate.notified().await;
                yield Ok(AgentEvent::Completed { result });
            }),
        }
    }
}

/// Script that completes with `result` after one progress step
pub fn completing(result: &str) -> Script {
    Script::Events(vec![
        AgentEvent::Progress {
            step: "Searching the web...".to_string(),
            progress: 20,
            partial: None,
        },
        AgentEvent::Completed {
            result: result.to_string(),
        },
    ])
}

pub fn test_config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.research.poll_interval_ms = 50;
    config.research.generation_timeout_secs = 1;
    config.database.max_lock_wait_ms = 5000;
    config
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    _dir: TempDir,
}

pub async fn test_app(script: Script) -> TestApp {
    test_app_with(test_config(), script).await
}

pub async fn test_app_with(config: TomlConfig, script: Script) -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = delve_common::db::init_database(&dir.path().join("delve.db"), 8)
        .await
        .expect("Failed to initialize database");

    let state = AppState::new(db, config, Arc::new(ScriptedAgent::new(script)));
    let router = delve_server::build_router(state.clone());

    TestApp {
        state,
        router,
        _dir: dir,
    }
}

impl TestApp {
    /// New user plus a bearer token for it
    pub async fn user(&self, email: &str) -> (User, String) {
        let name = email.split('@').next().unwrap_or(email);
        let user = delve_server::db::users::create_user(&self.state.db, email, name)
            .await
            .unwrap();
        let token = delve_server::db::users::create_token(&self.state.db, user.id, None)
            .await
            .unwrap();
        (user, token)
    }

    /// Organization owned by `owner` (free plan, 500 starting credits)
    pub async fn org(&self, owner: Uuid, slug: &str) -> Organization {
        self.state
            .organizations
            .create(owner, &format!("Org {}", slug), slug)
            .await
            .unwrap()
    }

    /// Overwrite a balance without a ledger entry
    pub async fn set_balance(&self, org_id: Uuid, balance: i64) {
        sqlx::query("UPDATE org_credits SET balance = ? WHERE org_id = ?")
            .bind(balance)
            .bind(org_id.to_string())
            .execute(&self.state.db)
            .await
            .unwrap();
    }

    pub async fn set_plan(&self, org_id: Uuid, plan: PlanId) {
        self.state.subscriptions.upgrade_plan(org_id, plan).await.unwrap();
    }

    pub async fn balance(&self, org_id: Uuid) -> i64 {
        self.state.ledger.get_balance(org_id).await.unwrap()
    }

    pub async fn add_member(&self, org_id: Uuid, user_id: Uuid, role: delve_server::models::Role) {
        let mut conn = self.state.db.acquire().await.unwrap();
        delve_server::db::organizations::insert_member(&mut conn, org_id, user_id, role)
            .await
            .unwrap();
    }

    pub async fn session_count(&self, org_id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM research_sessions WHERE org_id = ?")
            .bind(org_id.to_string())
            .fetch_one(&self.state.db)
            .await
            .unwrap()
    }

    /// Poll until the session leaves `processing`
    pub async fn wait_for_terminal(&self, session_id: Uuid) -> ResearchSession {
        for _ in 0..200 {
            let session = delve_server::db::sessions::load_session(&self.state.db, session_id)
                .await
                .unwrap()
                .expect("session vanished");
            if session.status.is_terminal() {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("session {} never reached a terminal status", session_id);
    }

    /// One request through the router; returns status and JSON body (Null if empty)
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = self.send_raw(method, uri, token, body).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// One request through the router; returns status and raw body
    pub async fn send_raw(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }
}
