//! Event intake endpoint

use crate::OrchestratorClient;
use crate::error::Result;
use sluice_core::dto::event::{EventAccepted, SubmitEvent};

impl OrchestratorClient {
    /// Submit a repository event, starting a new invocation
    ///
    /// # Example
    /// ```no_run
    /// # use sluice_client::OrchestratorClient;
    /// # use sluice_core::domain::event::Event;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let event = Event::proposed_merge("feature-x", "4f2a9c1").with_target("main");
    /// let accepted = client.submit_event(event.into()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit_event(&self, req: SubmitEvent) -> Result<EventAccepted> {
        let url = format!("{}/api/events", self.base_url);
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }
}
