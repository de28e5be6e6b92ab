//! Organization event stream
//!
//! Relays bus events of the caller's active organization (at connect
//! time) so clients can invalidate cached balance, org and history views.

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::api::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /events
pub async fn event_stream(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let org_id = state
        .organizations
        .current_organization(user.id)
        .await?
        .ok_or(ApiError::NoActiveOrganization)?
        .organization
        .id;
    debug!(user_id = %user.id, org_id = %org_id, "Event stream client connected");

    let stream = BroadcastStream::new(state.event_bus.subscribe())
        .take_until(state.shutdown.clone().cancelled_owned())
        .filter_map(move |received| async move {
            match received {
                Ok(event) if event.org_id() == org_id => Some(Ok(delve_common::sse::bus_event(&event))),
                Ok(_) => None,
                Err(e) => {
                    // Lagged: the client re-reads on the next event
                    warn!(org_id = %org_id, "Event stream lagged: {:?}", e);
                    None
                }
            }
        });

    Ok(Sse::new(stream).keep_alive(delve_common::sse::keep_alive()))
}

/// Build event stream routes
pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
