//! Event DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::{Event, EventKind};

/// Repository event submitted to the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEvent {
    pub kind: EventKind,
    pub branch: String,
    pub revision: String,
    #[serde(default)]
    pub target: Option<String>,
}

impl From<SubmitEvent> for Event {
    fn from(dto: SubmitEvent) -> Self {
        Event {
            kind: dto.kind,
            branch: dto.branch,
            revision: dto.revision,
            target: dto.target,
        }
    }
}

impl From<Event> for SubmitEvent {
    fn from(event: Event) -> Self {
        SubmitEvent {
            kind: event.kind,
            branch: event.branch,
            revision: event.revision,
            target: event.target,
        }
    }
}

/// Response to an accepted event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAccepted {
    pub invocation_id: Uuid,
    /// Earlier invocation on the same branch that was cancelled in favour
    /// of this one
    pub superseded: Option<Uuid>,
}
