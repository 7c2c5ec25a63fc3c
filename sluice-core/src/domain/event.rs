//! Source-control event types

use serde::{Deserialize, Serialize};

/// Kind of source-control event that started an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Commits pushed to a branch
    Push,
    /// A proposed merge (pull/merge request) was opened or updated
    ProposedMerge,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Push => write!(f, "push"),
            EventKind::ProposedMerge => write!(f, "proposed_merge"),
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "push" => Ok(EventKind::Push),
            "proposed_merge" | "pull_request" | "merge_request" => Ok(EventKind::ProposedMerge),
            other => Err(format!("unknown event kind '{}'", other)),
        }
    }
}

/// A change event driving one pipeline invocation
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Branch the change was made on
    pub branch: String,
    /// Immutable revision identifier (commit hash)
    pub revision: String,
    /// Branch a proposed merge would land on
    #[serde(default)]
    pub target: Option<String>,
}

impl Event {
    pub fn push(branch: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Push,
            branch: branch.into(),
            revision: revision.into(),
            target: None,
        }
    }

    pub fn proposed_merge(branch: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            kind: EventKind::ProposedMerge,
            branch: branch.into(),
            revision: revision.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Short form of the revision for display (first 8 characters)
    pub fn short_revision(&self) -> &str {
        let end = self
            .revision
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.revision.len());
        &self.revision[..end]
    }
}
