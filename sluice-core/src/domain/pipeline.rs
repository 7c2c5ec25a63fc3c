//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::event::Event;
use crate::domain::job::{JobDefinition, JobRun, JobStatus};
use crate::domain::service::BackingService;

/// Pipeline definition
///
/// Static configuration interpreted once per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub description: Option<String>,
    /// Pipeline-scoped environment, visible to every step
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub services: Vec<BackingService>,
    pub jobs: Vec<JobDefinition>,
}

impl PipelineDefinition {
    pub fn service(&self, name: &str) -> Option<&BackingService> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// Overall status of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// Configuration error detected before any job run started
    Rejected,
}

impl InvocationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvocationStatus::Running)
    }

    /// Derives the overall status from terminal job run statuses
    pub fn from_runs(runs: &[JobRun]) -> Self {
        if runs.iter().any(|r| !r.status.is_terminal()) {
            InvocationStatus::Running
        } else if runs.iter().any(|r| r.status == JobStatus::Cancelled) {
            InvocationStatus::Cancelled
        } else if runs.iter().any(|r| r.status == JobStatus::Failed) {
            InvocationStatus::Failed
        } else {
            InvocationStatus::Succeeded
        }
    }
}

impl std::fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvocationStatus::Running => "Running",
            InvocationStatus::Succeeded => "Succeeded",
            InvocationStatus::Failed => "Failed",
            InvocationStatus::Cancelled => "Cancelled",
            InvocationStatus::Rejected => "Rejected",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub invocation_id: Uuid,
    pub pipeline: String,
    pub event: Event,
    pub status: InvocationStatus,
    /// Job runs in topological order
    pub runs: Vec<JobRun>,
    /// Configuration error message when the invocation was rejected
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PipelineReport {
    pub fn run(&self, job: &str) -> Option<&JobRun> {
        self.runs.iter().find(|r| r.job == job)
    }

    pub fn status_of(&self, job: &str) -> Option<JobStatus> {
        self.run(job).map(|r| r.status)
    }

    pub fn succeeded(&self) -> bool {
        self.status == InvocationStatus::Succeeded
    }
}
