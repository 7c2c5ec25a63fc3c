//! Log DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::log::LogEntry;

/// Log lines captured for one job of an invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogs {
    pub job: String,
    pub entries: Vec<LogEntry>,
}

/// All logs of an invocation, grouped by job in topological order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationLogs {
    pub invocation_id: Uuid,
    pub jobs: Vec<JobLogs>,
}
