//! Event API Handlers

use axum::{Json, extract::State, http::StatusCode};
use std::sync::Arc;

use sluice_core::dto::event::{EventAccepted, SubmitEvent};

use crate::api::error::ApiResult;
use crate::service::InvocationService;

/// POST /api/events
/// Start an invocation for a repository event
///
/// A push cancels any running invocation for an earlier push to the same
/// branch.
pub async fn submit_event(
    State(invocations): State<Arc<InvocationService>>,
    Json(req): Json<SubmitEvent>,
) -> ApiResult<(StatusCode, Json<EventAccepted>)> {
    tracing::info!("Event {} on {} ({})", req.kind, req.branch, req.revision);

    let accepted = invocations.submit(req.into())?;

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
