//! Invocation DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::Event;
use crate::domain::job::JobStatus;
use crate::domain::pipeline::{InvocationStatus, PipelineReport};

/// Lightweight listing entry for an invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationSummary {
    pub id: Uuid,
    pub pipeline: String,
    pub event: Event,
    pub status: InvocationStatus,
    pub jobs: Vec<JobSummary>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub name: String,
    pub status: JobStatus,
}

impl From<&PipelineReport> for InvocationSummary {
    fn from(report: &PipelineReport) -> Self {
        InvocationSummary {
            id: report.invocation_id,
            pipeline: report.pipeline.clone(),
            event: report.event.clone(),
            status: report.status,
            jobs: report
                .runs
                .iter()
                .map(|r| JobSummary {
                    name: r.job.clone(),
                    status: r.status,
                })
                .collect(),
            started_at: report.started_at,
            ended_at: report.ended_at,
        }
    }
}

/// Response to a cancellation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub id: Uuid,
    /// False when the invocation had already finished
    pub cancelled: bool,
    pub status: InvocationStatus,
}
