//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific concern.

pub mod error;
pub mod health;
pub mod job;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::service::JobService;

/// Create the main API router with all endpoints
pub fn create_router(service: Arc<JobService>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job lifecycle
        .route("/jobs", post(job::register_job))
        .route("/jobs/{uid}", get(job::job_status).delete(job::remove_job))
        .route("/jobs/{uid}/result", get(job::job_result))
        .route("/jobs/{uid}/progress", put(job::push_progress))
        // Services attached to a running job
        .route(
            "/jobs/{uid}/services/{service_id}",
            post(job::setup_service).delete(job::teardown_service),
        )
        // Add state and middleware
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}
