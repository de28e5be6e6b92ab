//! Research agent adapter
//!
//! Generation itself is a black box. The orchestrator only sees a stream of
//! [`AgentEvent`]s; [`ProcessAgent`] produces one from an external command.

use delve_common::config::ResearchConfig;
use futures::stream::BoxStream;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::ResearchType;

/// Placeholder in `research.agent_args` replaced by the prompt
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

const STDERR_TAIL_CHARS: usize = 2000;

/// Smallest growth between two partial-output snapshots
const MIN_SNAPSHOT_GROWTH: usize = 1024;

/// One update from the generator
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Progress {
        step: String,
        progress: u8,
        partial: Option<String>,
    },
    Completed {
        result: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to start research agent: {0}")]
    Spawn(String),

    #[error("Research agent I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Research agent error: {0}")]
    Other(String),
}

/// Input for one generation run
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub session_id: Uuid,
    pub query: String,
    pub research_type: ResearchType,
    pub prompt: String,
}

pub type AgentStream = BoxStream<'static, Result<AgentEvent, AgentError>>;

/// Source of generation events
///
/// The stream is dropped when the run is abandoned (timeout), so
/// implementations must release their resources on drop.
pub trait ResearchAgent: Send + Sync + 'static {
    fn run(&self, request: ResearchRequest) -> AgentStream;
}

/// Step label and percentage for a line of agent output
fn classify_output(line: &str) -> (&'static str, u8) {
    let lower = line.to_lowercase();
    if lower.contains("search") {
        ("Searching the web...", 20)
    } else if lower.contains("read") || lower.contains("analyz") {
        ("Reading and analyzing sources...", 40)
    } else if lower.contains("generat") || lower.contains("creat") {
        ("Generating report...", 70)
    } else {
        ("Processing research...", 50)
    }
}

/// Decides when accumulated output is copied into a progress event
///
/// The threshold at least doubles after every snapshot, so the total bytes
/// copied stay proportional to the final output length.
#[derive(Debug, Default)]
struct SnapshotSchedule {
    next_at: usize,
}

impl SnapshotSchedule {
    fn due(&mut self, len: usize) -> bool {
        if len < self.next_at {
            return false;
        }
        self.next_at = (len * 2).max(len + MIN_SNAPSHOT_GROWTH);
        true
    }
}

fn tail(text: &str, max_chars: usize) -> &str {
    let trimmed = text.trim();
    match trimmed.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((idx, _)) if idx > 0 => &trimmed[idx..],
        _ => trimmed,
    }
}

/// Runs an external command per session and streams its stdout
///
/// Stdout lines drive progress events, emitted when the step changes or a
/// new snapshot of the output so far is due. Exit status 0 completes with
/// the full stdout, anything else fails with the tail of stderr. The child is killed when the stream is dropped.
pub struct ProcessAgent {
    command: Option<String>,
    args: Vec<String>,
}

impl ProcessAgent {
    pub fn new(command: Option<String>, args: Vec<String>) -> Self {
        Self { command, args }
    }

    pub fn from_config(config: &ResearchConfig) -> Self {
        Self::new(config.agent_command.clone(), config.agent_args.clone())
    }
}

impl ResearchAgent for ProcessAgent {
    fn run(&self, request: ResearchRequest) -> AgentStream {
        let command = self.command.clone();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(PROMPT_PLACEHOLDER, &request.prompt))
            .collect();
        let session_id = request.session_id;

        Box::pin(async_stream::stream! {
            let Some(command) = command else {
                yield Ok(AgentEvent::Failed {
                    error: "No research agent configured (research.agent_command)".to_string(),
                });
                return;
            };

            yield Ok(AgentEvent::Progress {
                step: "Initializing research agent...".to_string(),
                progress: 5,
                partial: None,
            });

            let spawned = Command::new(&command)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();

            let mut child = match spawned {
                Ok(child) => child,
                Err(e) => {
                    yield Err(AgentError::Spawn(format!("{}: {}", command, e)));
                    return;
                }
            };
            debug!(session_id = %session_id, command = %command, "Research agent started");

            let Some(stdout) = child.stdout.take() else {
                yield Err(AgentError::Other("stdout was not captured".to_string()));
                return;
            };

            // Drain stderr concurrently so a chatty child cannot block on a full pipe
            let stderr = child.stderr.take();
            let stderr_task = tokio::spawn(async move {
                let mut buf = String::new();
                if let Some(mut stderr) = stderr {
                    if let Err(e) = stderr.read_to_string(&mut buf).await {
                        warn!("Failed to read research agent stderr: {}", e);
                    }
                }
                buf
            });

            let mut lines = BufReader::new(stdout).lines();
            let mut output = String::new();
            let mut schedule = SnapshotSchedule::default();
            let mut last_step = None;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        output.push_str(&line);
                        output.push('\n');
                        let (step, progress) = classify_output(&line);
                        let step_changed = last_step != Some(step);
                        let partial = schedule.due(output.len()).then(|| output.clone());
                        if step_changed || partial.is_some() {
                            last_step = Some(step);
                            yield Ok(AgentEvent::Progress {
                                step: step.to_string(),
                                progress,
                                partial,
                            });
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(AgentError::Io(e));
                        return;
                    }
                }
            }

            let status = match child.wait().await {
                Ok(status) => status,
                Err(e) => {
                    yield Err(AgentError::Io(e));
                    return;
                }
            };
            let stderr_text = stderr_task.await.unwrap_or_default();

            if status.success() {
                yield Ok(AgentEvent::Completed { result: output });
            } else {
                yield Ok(AgentEvent::Failed {
                    error: format!(
                        "Research agent exited with {}: {}",
                        status,
                        tail(&stderr_text, STDERR_TAIL_CHARS)
                    ),
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn request() -> ResearchRequest {
        ResearchRequest {
            session_id: Uuid::new_v4(),
            query: "q".to_string(),
            research_type: ResearchType::Summary,
            prompt: "hello prompt".to_string(),
        }
    }

    #[test]
    fn test_classify_output() {
        assert_eq!(classify_output("Searching for sources").1, 20);
        assert_eq!(classify_output("Reading page 3").1, 40);
        assert_eq!(classify_output("Generating the report").1, 70);
        assert_eq!(classify_output("hmm").1, 50);
    }

    #[test]
    fn test_snapshot_schedule_backs_off() {
        let mut schedule = SnapshotSchedule::default();
        assert!(schedule.due(10));
        assert!(!schedule.due(500));
        assert!(schedule.due(1034));
        assert!(!schedule.due(2067));
        assert!(schedule.due(3000));
        assert!(!schedule.due(5999));
        assert!(schedule.due(6000));
    }

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
        assert_eq!(tail("  spaced  ", 10), "spaced");
    }

    #[tokio::test]
    async fn test_unconfigured_agent_fails_immediately() {
        let agent = ProcessAgent::new(None, vec![]);
        let events: Vec<_> = agent.run(request()).collect().await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(AgentEvent::Failed { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_output_becomes_result() {
        let agent = ProcessAgent::new(Some("echo".to_string()), vec![PROMPT_PLACEHOLDER.to_string()]);
        let events: Vec<_> = agent.run(request()).collect().await;

        match events.last() {
            Some(Ok(AgentEvent::Completed { result })) => assert_eq!(result, "hello prompt\n"),
            other => panic!("unexpected final event: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_long_output_emits_few_snapshots() {
        let agent = ProcessAgent::new(
            Some("seq".to_string()),
            vec!["1".to_string(), "20000".to_string()],
        );
        let events: Vec<_> = agent.run(request()).collect().await;

        let snapshots: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                Ok(AgentEvent::Progress { partial: Some(partial), .. }) => Some(partial.len()),
                _ => None,
            })
            .collect();
        assert!(!snapshots.is_empty());
        assert!(snapshots.len() < 20, "{} snapshots", snapshots.len());
        assert!(snapshots.windows(2).all(|pair| pair[1] >= pair[0] * 2));
        assert!(events.len() < 25);

        match events.last() {
            Some(Ok(AgentEvent::Completed { result })) => {
                assert!(result.starts_with("1\n2\n"));
                assert!(result.ends_with("20000\n"));
            }
            other => panic!("unexpected final event: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let agent = ProcessAgent::new(Some("false".to_string()), vec![]);
        let events: Vec<_> = agent.run(request()).collect().await;

        assert!(matches!(events.last(), Some(Ok(AgentEvent::Failed { .. }))));
    }
}
