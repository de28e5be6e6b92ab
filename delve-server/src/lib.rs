//! delve-server library interface
//!
//! Exposes the application state and router for the binary and for
//! integration tests.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use delve_common::config::TomlConfig;
use delve_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::{
    CreditLedger, OrganizationService, PaymentService, ResearchAgent, ResearchOrchestrator,
    SubscriptionService,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus relayed to `/events` and research streams
    pub event_bus: EventBus,
    pub config: Arc<TomlConfig>,
    pub ledger: CreditLedger,
    pub subscriptions: SubscriptionService,
    pub organizations: OrganizationService,
    pub payments: PaymentService,
    pub orchestrator: ResearchOrchestrator,
    /// Cancelled on shutdown; ends open SSE streams
    pub shutdown: CancellationToken,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire every service over one pool and one event bus
    pub fn new(db: SqlitePool, config: TomlConfig, agent: Arc<dyn ResearchAgent>) -> Self {
        let event_bus = EventBus::new(config.events.capacity);
        let lock_wait = config.database.max_lock_wait_ms;

        let ledger = CreditLedger::new(db.clone(), event_bus.clone(), lock_wait);
        let subscriptions =
            SubscriptionService::new(db.clone(), ledger.clone(), event_bus.clone(), lock_wait);
        let organizations = OrganizationService::new(
            db.clone(),
            subscriptions.clone(),
            ledger.clone(),
            event_bus.clone(),
            lock_wait,
        );
        let payments = PaymentService::new(db.clone(), ledger.clone(), lock_wait);
        let orchestrator = ResearchOrchestrator::new(
            db.clone(),
            ledger.clone(),
            subscriptions.clone(),
            organizations.clone(),
            agent,
            event_bus.clone(),
            Duration::from_secs(config.research.generation_timeout_secs),
            lock_wait,
        );

        Self {
            db,
            event_bus,
            config: Arc::new(config),
            ledger,
            subscriptions,
            organizations,
            payments,
            orchestrator,
            shutdown: CancellationToken::new(),
            startup_time: Utc::now(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.research.poll_interval_ms.max(1))
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::research_routes())
        .merge(api::history_routes())
        .merge(api::credits_routes())
        .merge(api::subscription_routes())
        .merge(api::organization_routes())
        .merge(api::payment_routes())
        .merge(api::event_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
