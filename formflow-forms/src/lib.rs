//! formflow-forms library interface
//!
//! Catalog-driven form workflow: look up a form, download it, discover its
//! fields, fill it with fallback between strategies, and keep reusable
//! field-value cases. Exposed as a library for the binary and for
//! integration tests.

pub mod api;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use formflow_common::config::AppConfig;
use formflow_common::events::EventBus;
use services::{Catalog, TaskRunner, WorkflowOrchestrator};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Loaded once at startup; read-only afterwards
    pub catalog: Arc<Catalog>,
    pub orchestrator: Arc<WorkflowOrchestrator>,
    /// Background workflow runs started over HTTP
    pub tasks: TaskRunner,
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        catalog: Catalog,
        orchestrator: WorkflowOrchestrator,
        event_bus: EventBus,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            orchestrator: Arc::new(orchestrator),
            tasks: TaskRunner::new(),
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .merge(api::catalog_routes())
        .merge(api::workflow_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
