//! Invocation API Handlers
//!
//! HTTP endpoints for inspecting and cancelling invocations.

use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;
use uuid::Uuid;

use sluice_core::domain::pipeline::PipelineReport;
use sluice_core::dto::invocation::{CancelResponse, InvocationSummary};
use sluice_core::dto::log::InvocationLogs;

use crate::api::error::ApiResult;
use crate::service::InvocationService;

/// GET /api/invocations
/// List invocations, newest first
pub async fn list_invocations(
    State(invocations): State<Arc<InvocationService>>,
) -> ApiResult<Json<Vec<InvocationSummary>>> {
    tracing::debug!("Listing invocations");

    Ok(Json(invocations.list()))
}

/// GET /api/invocations/{id}
/// Full report of one invocation
pub async fn get_invocation(
    State(invocations): State<Arc<InvocationService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineReport>> {
    tracing::debug!("Getting invocation: {}", id);

    Ok(Json(invocations.get(id)?))
}

/// GET /api/invocations/{id}/logs
/// Logs collected so far, grouped by job
pub async fn get_invocation_logs(
    State(invocations): State<Arc<InvocationService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<InvocationLogs>> {
    tracing::debug!("Getting logs for invocation: {}", id);

    Ok(Json(invocations.logs(id)?))
}

/// POST /api/invocations/{id}/cancel
pub async fn cancel_invocation(
    State(invocations): State<Arc<InvocationService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    tracing::info!("Cancelling invocation: {}", id);

    Ok(Json(invocations.cancel(id)?))
}
