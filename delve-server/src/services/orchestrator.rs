//! Research orchestrator
//!
//! Accepts research submissions, charges credits and runs generation as a
//! detached background task. The submission and its charge commit together:
//! a session row exists if and only if its `consume` entry exists.
//!
//! Background runs end in exactly one terminal write. Panics, timeouts and
//! agent streams that stop without a verdict all become `failed`.

use delve_common::events::{DelveEvent, EventBus};
use futures::StreamExt;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::research::research_cost;
use crate::models::{
    Actor, HistoryEntry, Permission, ResearchProgress, ResearchSession, ResearchStatus, ResearchType,
};
use crate::services::agent::{AgentEvent, ResearchAgent, ResearchRequest};
use crate::services::ledger::{consume_in_tx, CreditLedger};
use crate::services::organization::OrganizationService;
use crate::services::prompts::build_prompt;
use crate::services::subscription::SubscriptionService;
use crate::utils::retry_on_lock;

/// Result text written for sessions found `processing` at startup
pub const INTERRUPTED_MESSAGE: &str = "Research interrupted by server restart";

/// Sessions returned by the history listing
pub const HISTORY_LIMIT: i64 = 50;

/// Live progress of in-flight sessions, keyed by session id
pub type ProgressRegistry = Arc<RwLock<HashMap<Uuid, ResearchProgress>>>;

/// Response to an accepted submission
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedResearch {
    pub session_id: Uuid,
    pub status: ResearchStatus,
    pub credits_used: i64,
}

/// How a background run ended
#[derive(Debug, Clone, PartialEq)]
enum GenerationOutcome {
    Completed(String),
    Failed(String),
}

#[derive(Clone)]
pub struct ResearchOrchestrator {
    db: SqlitePool,
    ledger: CreditLedger,
    subscriptions: SubscriptionService,
    organizations: OrganizationService,
    agent: Arc<dyn ResearchAgent>,
    event_bus: EventBus,
    progress: ProgressRegistry,
    generation_timeout: Duration,
    max_lock_wait_ms: u64,
}

impl ResearchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        ledger: CreditLedger,
        subscriptions: SubscriptionService,
        organizations: OrganizationService,
        agent: Arc<dyn ResearchAgent>,
        event_bus: EventBus,
        generation_timeout: Duration,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            ledger,
            subscriptions,
            organizations,
            agent,
            event_bus,
            progress: Arc::new(RwLock::new(HashMap::new())),
            generation_timeout,
            max_lock_wait_ms,
        }
    }

    pub fn progress_registry(&self) -> ProgressRegistry {
        self.progress.clone()
    }

    /// Latest progress of an in-flight session
    pub async fn progress(&self, session_id: Uuid) -> Option<ResearchProgress> {
        self.progress.read().await.get(&session_id).cloned()
    }

    /// Validate, charge and start a research session
    ///
    /// Checks run in a fixed order so the first failing one decides the
    /// error: input, active organization, plan entitlement, cost, balance.
    pub async fn submit(&self, user_id: Uuid, query: &str, research_type: &str) -> ApiResult<SubmittedResearch> {
        let query = query.trim();
        let research_type = research_type.trim();
        if query.is_empty() || research_type.is_empty() {
            return Err(ApiError::Validation(
                "Query and research type are required".to_string(),
            ));
        }

        let membership = self
            .organizations
            .current_organization(user_id)
            .await?
            .ok_or(ApiError::NoActiveOrganization)?;
        let org_id = membership.organization.id;

        if !membership.role.has_permission(Permission::ResearchCreate) {
            return Err(ApiError::Forbidden("Missing permission research:create".to_string()));
        }

        let entitlement = self
            .subscriptions
            .can_use_research_type(org_id, research_type)
            .await?;
        if !entitlement.allowed {
            return Err(ApiError::ResearchTypeNotAllowed(
                entitlement
                    .reason
                    .unwrap_or_else(|| "Research type not available on this plan".to_string()),
            ));
        }

        let cost = research_cost(research_type)
            .ok_or_else(|| ApiError::InvalidResearchType(research_type.to_string()))?;
        let parsed_type: ResearchType = research_type
            .parse()
            .map_err(|_| ApiError::InvalidResearchType(research_type.to_string()))?;

        let balance = self.ledger.get_balance(org_id).await?;
        if balance < cost {
            return Err(ApiError::InsufficientCredits {
                required: cost,
                balance,
            });
        }

        let now = delve_common::time::now();
        let session = ResearchSession {
            id: Uuid::new_v4(),
            org_id,
            user_id,
            query: query.to_string(),
            research_type: parsed_type,
            status: ResearchStatus::Processing,
            credits_used: cost,
            result: None,
            created_at: now,
            updated_at: now,
        };

        let description = format!("Research: {}", parsed_type);
        let metadata = serde_json::json!({
            "researchId": session.id,
            "researchType": parsed_type.as_str(),
        });

        let charged = retry_on_lock("research submit", self.max_lock_wait_ms, || async {
            let mut tx = self.db.begin().await?;
            db::sessions::insert_session(&mut tx, &session).await?;
            let balance = consume_in_tx(
                &mut tx,
                org_id,
                Actor::User(user_id),
                cost,
                &description,
                Some(metadata.clone()),
            )
            .await?;
            if balance.is_some() {
                tx.commit().await?;
            }
            // Dropping an uncommitted transaction rolls the session insert back
            Ok::<_, delve_common::Error>(balance)
        })
        .await?;

        let Some(new_balance) = charged else {
            let balance = self.ledger.get_balance(org_id).await?;
            return Err(ApiError::InsufficientCredits {
                required: cost,
                balance,
            });
        };

        info!(
            session_id = %session.id,
            org_id = %org_id,
            user_id = %user_id,
            research_type = %parsed_type,
            cost,
            "Research session created"
        );

        self.event_bus.emit_lossy(DelveEvent::ResearchSessionCreated {
            session_id: session.id,
            org_id,
            user_id,
            research_type: parsed_type.as_str().to_string(),
            credits_used: cost,
            timestamp: now,
        });
        self.ledger.publish_change(org_id, new_balance, -cost);

        self.spawn_generation(session.clone());

        Ok(SubmittedResearch {
            session_id: session.id,
            status: ResearchStatus::Processing,
            credits_used: cost,
        })
    }

    /// Run generation for `session` on a detached task
    pub fn spawn_generation(&self, session: ResearchSession) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run_generation(session).await })
    }

    async fn run_generation(&self, session: ResearchSession) {
        let session_id = session.id;
        self.progress.write().await.insert(
            session_id,
            ResearchProgress {
                step: "Starting research...".to_string(),
                progress: 0,
                partial: None,
            },
        );

        // The agent runs on its own task so a panic surfaces as a JoinError
        let mut handle = {
            let this = self.clone();
            let session = session.clone();
            tokio::spawn(async move { this.drive_agent(&session).await })
        };

        let outcome = match tokio::time::timeout(self.generation_timeout, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => GenerationOutcome::Failed(join_failure_message(join_error)),
            Err(_) => {
                handle.abort();
                warn!(session_id = %session_id, "Research generation timed out");
                GenerationOutcome::Failed(format!(
                    "Research timed out after {} seconds",
                    self.generation_timeout.as_secs()
                ))
            }
        };

        self.finish(&session, outcome).await;
        self.progress.write().await.remove(&session_id);
    }

    async fn drive_agent(&self, session: &ResearchSession) -> GenerationOutcome {
        let request = ResearchRequest {
            session_id: session.id,
            query: session.query.clone(),
            research_type: session.research_type,
            prompt: build_prompt(&session.query, session.research_type),
        };

        let mut events = self.agent.run(request);
        while let Some(item) = events.next().await {
            match item {
                Ok(AgentEvent::Progress {
                    step,
                    progress,
                    partial,
                }) => {
                    let progress = progress.min(99);
                    debug!(session_id = %session.id, step = %step, progress, "Research progress");
                    {
                        let mut registry = self.progress.write().await;
                        // Keep the last snapshot until the agent sends a newer one
                        let partial = partial.or_else(|| {
                            registry.get_mut(&session.id).and_then(|p| p.partial.take())
                        });
                        registry.insert(
                            session.id,
                            ResearchProgress {
                                step: step.clone(),
                                progress,
                                partial,
                            },
                        );
                    }
                    self.event_bus.emit_lossy(DelveEvent::ResearchProgress {
                        session_id: session.id,
                        org_id: session.org_id,
                        step,
                        progress,
                        timestamp: delve_common::time::now(),
                    });
                }
                Ok(AgentEvent::Completed { result }) => return GenerationOutcome::Completed(result),
                Ok(AgentEvent::Failed { error }) => return GenerationOutcome::Failed(error),
                Err(e) => return GenerationOutcome::Failed(e.to_string()),
            }
        }

        GenerationOutcome::Failed("Research agent ended without a result".to_string())
    }

    /// Single terminal write for a run
    async fn finish(&self, session: &ResearchSession, outcome: GenerationOutcome) {
        let now = delve_common::time::now();
        let (status, text) = match &outcome {
            GenerationOutcome::Completed(result) => (ResearchStatus::Completed, result.as_str()),
            GenerationOutcome::Failed(message) => (ResearchStatus::Failed, message.as_str()),
        };

        let written = match db::sessions::finish_session(&self.db, session.id, status, text, now).await {
            Ok(written) => Ok((written, status)),
            Err(e) if status == ResearchStatus::Completed => {
                // A result that cannot be stored still must not leave the session processing
                error!(session_id = %session.id, "Failed to store research result: {}", e);
                let message = format!("Failed to store research result: {}", e);
                db::sessions::finish_session(&self.db, session.id, ResearchStatus::Failed, &message, now)
                    .await
                    .map(|written| (written, ResearchStatus::Failed))
            }
            Err(e) => Err(e),
        };

        match written {
            Ok((true, ResearchStatus::Completed)) => {
                info!(session_id = %session.id, "Research session completed");
                self.event_bus.emit_lossy(DelveEvent::ResearchSessionCompleted {
                    session_id: session.id,
                    org_id: session.org_id,
                    timestamp: now,
                });
            }
            Ok((true, _)) => {
                let error = match outcome {
                    GenerationOutcome::Failed(message) => message,
                    GenerationOutcome::Completed(_) => "Failed to store research result".to_string(),
                };
                warn!(session_id = %session.id, error = %error, "Research session failed");
                self.event_bus.emit_lossy(DelveEvent::ResearchSessionFailed {
                    session_id: session.id,
                    org_id: session.org_id,
                    error,
                    timestamp: now,
                });
            }
            Ok((false, _)) => {
                debug!(session_id = %session.id, "Session already terminal or deleted; result discarded");
            }
            Err(e) => {
                error!(session_id = %session.id, "Failed to record research outcome: {}", e);
            }
        }
    }

    /// Session with its org-membership check
    pub async fn get_session(&self, user_id: Uuid, session_id: Uuid) -> ApiResult<ResearchSession> {
        let session = db::sessions::load_session(&self.db, session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Research session not found".to_string()))?;

        self.organizations
            .require_permission(user_id, session.org_id, Permission::ResearchViewAll)
            .await?;

        Ok(session)
    }

    /// Recent sessions of the user's current organization
    pub async fn history(&self, user_id: Uuid) -> ApiResult<Vec<HistoryEntry>> {
        let Some(membership) = self.organizations.current_organization(user_id).await? else {
            return Ok(Vec::new());
        };
        Ok(db::sessions::list_history(&self.db, membership.organization.id, HISTORY_LIMIT).await?)
    }

    /// Delete a session: `research:delete_all`, or `research:delete_own` on
    /// one's own session
    ///
    /// Credits are not refunded.
    pub async fn delete_session(&self, user_id: Uuid, session_id: Uuid) -> ApiResult<()> {
        let session = db::sessions::load_session(&self.db, session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Research session not found".to_string()))?;

        let role = self.organizations.require_member(user_id, session.org_id).await?;
        let allowed = role.has_permission(Permission::ResearchDeleteAll)
            || (role.has_permission(Permission::ResearchDeleteOwn) && session.user_id == user_id);
        if !allowed {
            return Err(ApiError::Forbidden(
                "You can only delete your own research".to_string(),
            ));
        }

        db::sessions::delete_session(&self.db, session_id).await?;
        info!(session_id = %session_id, deleted_by = %user_id, "Research session deleted");
        Ok(())
    }

    /// Fail sessions left `processing` by a previous process
    ///
    /// Call once at startup, before accepting submissions.
    pub async fn recover_interrupted(&self) -> ApiResult<u64> {
        let count =
            db::sessions::fail_stale_sessions(&self.db, INTERRUPTED_MESSAGE, delve_common::time::now()).await?;
        if count > 0 {
            warn!(count, "Marked interrupted research sessions as failed");
        }
        Ok(count)
    }
}

fn join_failure_message(join_error: JoinError) -> String {
    if join_error.is_cancelled() {
        return "Research task was cancelled".to_string();
    }

    let payload = join_error.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!("Research task panicked: {}", detail);
    format!("Research task panicked: {}", detail)
}
