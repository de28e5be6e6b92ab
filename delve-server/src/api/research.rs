//! Research submission, snapshot and progress stream

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::debug;
use uuid::Uuid;

use crate::api::{required, AuthUser, ValidJson};
use crate::error::ApiResult;
use crate::models::{ResearchProgress, ResearchSession};
use crate::services::{session_frames, SubmittedResearch};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default, rename = "type")]
    pub research_type: Option<String>,
}

/// Session snapshot plus live progress while processing
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub session: ResearchSession,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ResearchProgress>,
}

/// POST /research
pub async fn submit_research(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidJson(request): ValidJson<SubmitRequest>,
) -> ApiResult<Json<SubmittedResearch>> {
    let query = required(request.query, "query")?;
    let research_type = required(request.research_type, "type")?;

    let submitted = state.orchestrator.submit(user.id, &query, &research_type).await?;
    Ok(Json(submitted))
}

/// GET /research/:id
pub async fn get_research(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.orchestrator.get_session(user.id, session_id).await?;
    let progress = if session.status.is_terminal() {
        None
    } else {
        state.orchestrator.progress(session_id).await
    };
    Ok(Json(SessionResponse { session, progress }))
}

/// GET /research/:id/stream
///
/// Access is checked once at open; afterwards the stream reports a deleted
/// session as an `error` frame.
pub async fn research_stream(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    state.orchestrator.get_session(user.id, session_id).await?;
    debug!(session_id = %session_id, user_id = %user.id, "Research stream opened");

    let frames = session_frames(
        state.db.clone(),
        state.orchestrator.progress_registry(),
        state.event_bus.subscribe(),
        session_id,
        state.poll_interval(),
        state.shutdown.clone(),
    );
    let stream = frames.map(|frame| Ok(delve_common::sse::json_event(&frame)));

    Ok(Sse::new(stream).keep_alive(delve_common::sse::keep_alive()))
}

/// Build research routes
pub fn research_routes() -> Router<AppState> {
    Router::new()
        .route("/research", post(submit_research))
        .route("/research/:id", get(get_research))
        .route("/research/:id/stream", get(research_stream))
}
