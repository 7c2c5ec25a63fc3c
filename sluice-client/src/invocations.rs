//! Invocation endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use sluice_core::domain::pipeline::PipelineReport;
use sluice_core::dto::invocation::{CancelResponse, InvocationSummary};
use sluice_core::dto::log::InvocationLogs;
use uuid::Uuid;

impl OrchestratorClient {
    /// List every invocation, newest first
    pub async fn list_invocations(&self) -> Result<Vec<InvocationSummary>> {
        let url = format!("{}/api/invocations", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get the full report of an invocation
    pub async fn get_invocation(&self, id: Uuid) -> Result<PipelineReport> {
        let url = format!("{}/api/invocations/{}", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get the logs an invocation has produced so far
    pub async fn get_invocation_logs(&self, id: Uuid) -> Result<InvocationLogs> {
        let url = format!("{}/api/invocations/{}/logs", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Request cancellation of a running invocation
    pub async fn cancel_invocation(&self, id: Uuid) -> Result<CancelResponse> {
        let url = format!("{}/api/invocations/{}/cancel", self.base_url, id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }
}
