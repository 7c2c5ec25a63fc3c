//! Common types used across CLI modules

use clap::Args;
use sluice_core::domain::event::{Event, EventKind};
use uuid::Uuid;

/// Identifier that can be either a full UUID or an unambiguous prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdOrPrefix {
    Full(Uuid),
    /// Prefix that should uniquely identify an invocation
    Prefix(String),
}

impl IdOrPrefix {
    /// Attempts to parse as a full UUID first, otherwise treats as a prefix
    pub fn parse(input: &str) -> Self {
        match Uuid::parse_str(input) {
            Ok(uuid) => IdOrPrefix::Full(uuid),
            Err(_) => IdOrPrefix::Prefix(input.to_lowercase()),
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            IdOrPrefix::Full(uuid) => Some(*uuid),
            IdOrPrefix::Prefix(_) => None,
        }
    }
}

impl std::fmt::Display for IdOrPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdOrPrefix::Full(uuid) => write!(f, "{}", uuid),
            IdOrPrefix::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}

/// Event flags shared by `run`, `plan` and `event submit`
#[derive(Args, Debug, Clone)]
pub struct EventArgs {
    /// Event kind: push or proposed_merge
    #[arg(long = "event", default_value = "push")]
    pub kind: EventKind,

    /// Branch the event happened on (defaults to the trunk branch)
    #[arg(long)]
    pub branch: Option<String>,

    /// Revision id
    #[arg(long, env = "COMMIT_SHA", default_value = "local")]
    pub revision: String,

    /// Target branch of a proposed merge
    #[arg(long)]
    pub target: Option<String>,
}

impl EventArgs {
    pub fn to_event(&self, trunk: &str) -> Event {
        let branch = self.branch.clone().unwrap_or_else(|| trunk.to_string());
        let event = match self.kind {
            EventKind::Push => Event::push(branch, &self.revision),
            EventKind::ProposedMerge => Event::proposed_merge(branch, &self.revision),
        };
        match &self.target {
            Some(target) => event.with_target(target),
            None => event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_id() {
        let id = Uuid::new_v4();
        assert_eq!(IdOrPrefix::parse(&id.to_string()), IdOrPrefix::Full(id));
    }

    #[test]
    fn test_parse_prefix_is_lowercased() {
        let parsed = IdOrPrefix::parse("3F2A");
        assert_eq!(parsed, IdOrPrefix::Prefix("3f2a".to_string()));
        assert!(parsed.as_uuid().is_none());
    }

    #[test]
    fn test_event_defaults_to_trunk_push() {
        let args = EventArgs {
            kind: EventKind::Push,
            branch: None,
            revision: "abc123".to_string(),
            target: None,
        };
        assert_eq!(args.to_event("main"), Event::push("main", "abc123"));
    }

    #[test]
    fn test_proposed_merge_with_target() {
        let args = EventArgs {
            kind: EventKind::ProposedMerge,
            branch: Some("feature-x".to_string()),
            revision: "abc123".to_string(),
            target: Some("main".to_string()),
        };
        assert_eq!(
            args.to_event("main"),
            Event::proposed_merge("feature-x", "abc123").with_target("main")
        );
    }
}
