//! Configuration errors
//!
//! Raised before any job run is created; fatal to the whole invocation.

use thiserror::Error;

use crate::domain::secrets::SecretKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("job '{0}' is defined more than once")]
    DuplicateJob(String),

    #[error("service '{0}' is defined more than once")]
    DuplicateService(String),

    #[error("job '{job}' depends on unknown job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("job '{job}' references unknown service '{service}'")]
    UnknownService { job: String, service: String },

    #[error("step '{step}' of job '{job}' needs service '{service}' which the job does not declare")]
    UndeclaredStepService {
        job: String,
        step: String,
        service: String,
    },

    #[error("dependency cycle between jobs: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("job '{job}' requires {secret} but none was provided")]
    MissingSecret { job: String, secret: SecretKind },

    #[error("job '{0}' has no steps")]
    EmptyJob(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
