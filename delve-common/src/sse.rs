//! Server-Sent Events (SSE) utilities

use crate::events::DelveEvent;
use axum::response::sse::{Event, KeepAlive};
use std::time::Duration;
use tracing::warn;

/// Interval between keep-alive comments on idle streams
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Keep-alive policy shared by every SSE endpoint
pub fn keep_alive() -> KeepAlive {
    KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("heartbeat")
}

/// Unnamed `data:` frame carrying a JSON payload
///
/// Serialization failures degrade to an empty object instead of tearing
/// down the stream.
pub fn json_event<T: serde::Serialize>(payload: &T) -> Event {
    match serde_json::to_string(payload) {
        Ok(data) => Event::default().data(data),
        Err(e) => {
            warn!("Failed to serialize SSE payload: {}", e);
            Event::default().data("{}")
        }
    }
}

/// Named frame for a bus event (`event:` is the variant name)
pub fn bus_event(event: &DelveEvent) -> Event {
    json_event(event).event(event.event_type())
}
