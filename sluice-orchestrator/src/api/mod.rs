//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod event;
pub mod health;
pub mod invocation;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::service::InvocationService;

/// Create the main API router with all endpoints
pub fn create_router(invocations: Arc<InvocationService>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Event intake
        .route("/api/events", post(event::submit_event))
        // Invocation endpoints
        .route("/api/invocations", get(invocation::list_invocations))
        .route("/api/invocations/{id}", get(invocation::get_invocation))
        .route("/api/invocations/{id}/logs", get(invocation::get_invocation_logs))
        .route("/api/invocations/{id}/cancel", post(invocation::cancel_invocation))
        // Add state and middleware
        .with_state(invocations)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
