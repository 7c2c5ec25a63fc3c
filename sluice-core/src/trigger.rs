//! Trigger predicates
//!
//! A `Trigger` decides whether a job is eligible to run for an event.
//! Evaluation is pure: no side effects, no ambient state.

use serde::{Deserialize, Serialize};

use crate::domain::event::{Event, EventKind};

/// Composable eligibility predicate over an `Event`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    Always,
    Never,
    /// Event is of this kind
    Kind(EventKind),
    /// Event happened on this branch
    Branch(String),
    /// Event lands on this branch: the branch of a push, the target of a
    /// proposed merge (a merge without a target is assumed to land here)
    Target(String),
    All(Vec<Trigger>),
    Any(Vec<Trigger>),
    Not(Box<Trigger>),
}

impl Trigger {
    pub fn push() -> Self {
        Trigger::Kind(EventKind::Push)
    }

    pub fn proposed_merge() -> Self {
        Trigger::Kind(EventKind::ProposedMerge)
    }

    pub fn branch(name: impl Into<String>) -> Self {
        Trigger::Branch(name.into())
    }

    pub fn target(name: impl Into<String>) -> Self {
        Trigger::Target(name.into())
    }

    /// Pushes to trunk and proposed merges into trunk
    pub fn integration(trunk: &str) -> Self {
        Trigger::push()
            .and(Trigger::branch(trunk))
            .or(Trigger::proposed_merge().and(Trigger::target(trunk)))
    }

    /// Pushes to trunk only
    pub fn trunk_push(trunk: &str) -> Self {
        Trigger::push().and(Trigger::branch(trunk))
    }

    pub fn and(self, other: Trigger) -> Self {
        match self {
            Trigger::All(mut all) => {
                all.push(other);
                Trigger::All(all)
            }
            this => Trigger::All(vec![this, other]),
        }
    }

    pub fn or(self, other: Trigger) -> Self {
        match self {
            Trigger::Any(mut any) => {
                any.push(other);
                Trigger::Any(any)
            }
            this => Trigger::Any(vec![this, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Trigger::Not(Box::new(self))
    }

    pub fn evaluate(&self, event: &Event) -> bool {
        match self {
            Trigger::Always => true,
            Trigger::Never => false,
            Trigger::Kind(kind) => event.kind == *kind,
            Trigger::Branch(name) => event.branch == *name,
            Trigger::Target(name) => match event.kind {
                EventKind::Push => event.branch == *name,
                EventKind::ProposedMerge => event.target.as_deref().is_none_or(|t| t == name),
            },
            Trigger::All(all) => all.iter().all(|t| t.evaluate(event)),
            Trigger::Any(any) => any.iter().any(|t| t.evaluate(event)),
            Trigger::Not(inner) => !inner.evaluate(event),
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Always => write!(f, "always"),
            Trigger::Never => write!(f, "never"),
            Trigger::Kind(kind) => write!(f, "{}", kind),
            Trigger::Branch(name) => write!(f, "branch == {}", name),
            Trigger::Target(name) => write!(f, "target == {}", name),
            Trigger::All(all) => write_joined(f, all, " && "),
            Trigger::Any(any) => write_joined(f, any, " || "),
            Trigger::Not(inner) => write!(f, "!({})", inner),
        }
    }
}

fn write_joined(f: &mut std::fmt::Formatter<'_>, parts: &[Trigger], sep: &str) -> std::fmt::Result {
    write!(f, "(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", part)?;
    }
    write!(f, ")")
}
