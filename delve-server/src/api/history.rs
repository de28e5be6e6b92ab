//! Organization-scoped research history

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::AuthUser;
use crate::error::ApiResult;
use crate::models::{HistoryEntry, ResearchSession};
use crate::AppState;

/// GET /history
pub async fn list_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    Ok(Json(state.orchestrator.history(user.id).await?))
}

/// GET /history/:id
pub async fn get_history_entry(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<ResearchSession>> {
    Ok(Json(state.orchestrator.get_session(user.id, session_id).await?))
}

/// DELETE /history/:id
pub async fn delete_history_entry(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    state.orchestrator.delete_session(user.id, session_id).await?;
    Ok(Json(json!({ "success": true })))
}

/// Build history routes
pub fn history_routes() -> Router<AppState> {
    Router::new()
        .route("/history", get(list_history))
        .route(
            "/history/:id",
            get(get_history_entry).delete(delete_history_entry),
        )
}
