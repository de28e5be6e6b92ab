//! Session stream gateway
//!
//! Turns a session's stored state into a sequence of frames for a live
//! client. The store is the source of truth: bus events only wake the loop
//! early, and a missed or lagged event costs at most one poll interval.

use delve_common::events::DelveEvent;
use futures::Stream;
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db;
use crate::models::{ResearchProgress, ResearchSession, ResearchStatus};
use crate::services::orchestrator::ProgressRegistry;

/// One message to a stream client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    Progress {
        status: ResearchStatus,
        query: String,
        result: Option<String>,
        #[serde(rename = "hasResult")]
        has_result: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
    },
    Done {
        status: ResearchStatus,
    },
    Error {
        message: String,
    },
}

impl StreamFrame {
    fn snapshot(session: &ResearchSession, live: Option<ResearchProgress>) -> Self {
        let (step, progress, partial) = match live {
            Some(p) => (Some(p.step), Some(p.progress), p.partial),
            None if session.status == ResearchStatus::Completed => (None, Some(100), None),
            None => (None, None, None),
        };

        // Terminal sessions report the stored result; in-flight ones the partial output
        let result = session.result.clone().or(partial);

        StreamFrame::Progress {
            status: session.status,
            query: session.query.clone(),
            has_result: result.as_deref().is_some_and(|r| !r.is_empty()),
            result,
            step,
            progress,
        }
    }

    pub fn is_last(&self) -> bool {
        !matches!(self, StreamFrame::Progress { .. })
    }
}

enum Wake {
    Tick,
    Event(Result<DelveEvent, RecvError>),
    Shutdown,
}

async fn next_event(events: &mut Option<broadcast::Receiver<DelveEvent>>) -> Result<DelveEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

struct DisconnectLog {
    session_id: Uuid,
}

impl Drop for DisconnectLog {
    fn drop(&mut self) {
        debug!(session_id = %self.session_id, "Research stream closed");
    }
}

/// Frames for `session_id` until it is terminal, missing or the server stops
///
/// The first frame is sent immediately. Dropping the stream (client
/// disconnect) ends the loop; it never affects the background run.
pub fn session_frames(
    db: SqlitePool,
    progress: ProgressRegistry,
    events: broadcast::Receiver<DelveEvent>,
    session_id: Uuid,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = StreamFrame> {
    async_stream::stream! {
        let _log = DisconnectLog { session_id };
        let mut events = Some(events);
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                _ = ticker.tick() => Wake::Tick,
                received = next_event(&mut events) => Wake::Event(received),
                _ = shutdown.cancelled() => Wake::Shutdown,
            };

            match wake {
                Wake::Tick => {}
                Wake::Event(Ok(event)) if event.session_id() == Some(session_id) => {}
                Wake::Event(Ok(_)) => continue,
                Wake::Event(Err(RecvError::Lagged(skipped))) => {
                    debug!(session_id = %session_id, skipped, "Stream lagged behind event bus");
                }
                Wake::Event(Err(RecvError::Closed)) => {
                    events = None;
                    continue;
                }
                Wake::Shutdown => {
                    yield StreamFrame::Error { message: "Server shutting down".to_string() };
                    break;
                }
            }

            match db::sessions::load_session(&db, session_id).await {
                Ok(Some(session)) => {
                    let live = progress.read().await.get(&session_id).cloned();
                    let terminal = session.status.is_terminal();
                    yield StreamFrame::snapshot(&session, live);
                    if terminal {
                        yield StreamFrame::Done { status: session.status };
                        break;
                    }
                }
                Ok(None) => {
                    yield StreamFrame::Error { message: "Session not found".to_string() };
                    break;
                }
                Err(e) => {
                    warn!(session_id = %session_id, "Failed to read session for stream: {}", e);
                    yield StreamFrame::Error { message: "Failed to read session".to_string() };
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResearchType;

    fn session(status: ResearchStatus, result: Option<&str>) -> ResearchSession {
        let now = delve_common::time::now();
        ResearchSession {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            query: "rust vs go".to_string(),
            research_type: ResearchType::Summary,
            status,
            credits_used: 10,
            result: result.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_progress_frame_shape() {
        let frame = StreamFrame::snapshot(
            &session(ResearchStatus::Processing, None),
            Some(ResearchProgress {
                step: "Searching the web...".to_string(),
                progress: 20,
                partial: None,
            }),
        );
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "progress");
        assert_eq!(json["status"], "processing");
        assert_eq!(json["hasResult"], false);
        assert_eq!(json["progress"], 20);
        assert!(json["result"].is_null());
    }

    #[test]
    fn test_completed_frame_carries_result() {
        let frame = StreamFrame::snapshot(&session(ResearchStatus::Completed, Some("# Report")), None);
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["result"], "# Report");
        assert_eq!(json["hasResult"], true);
        assert_eq!(json["progress"], 100);
    }

    #[test]
    fn test_done_and_error_frames() {
        let done = serde_json::to_value(StreamFrame::Done { status: ResearchStatus::Failed }).unwrap();
        assert_eq!(done, serde_json::json!({"type": "done", "status": "failed"}));

        let error = StreamFrame::Error { message: "Session not found".to_string() };
        assert!(error.is_last());
        assert_eq!(serde_json::to_value(error).unwrap()["type"], "error");
    }
}
