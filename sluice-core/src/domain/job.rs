//! Job domain types
//!
//! `JobDefinition` and `StepDefinition` are static configuration.
//! `JobRun` and `StepRecord` are produced once per invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::domain::artifact::Artifact;
use crate::domain::log::LogEntry;
use crate::domain::secrets::SecretKind;
use crate::trigger::Trigger;

/// A named unit of pipeline work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    /// Jobs that must succeed before this one may start
    #[serde(default)]
    pub needs: Vec<String>,
    /// Eligibility predicate evaluated against the invocation event
    #[serde(default)]
    pub when: Trigger,
    /// Backing services this job polls for readiness when it starts
    #[serde(default)]
    pub services: Vec<String>,
    /// Container image the job's commands run in (host shell when absent)
    #[serde(default)]
    pub container: Option<String>,
    /// Job-scoped environment, visible to every step unless overridden
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub steps: Vec<StepDefinition>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            needs: Vec::new(),
            when: Trigger::Always,
            services: Vec::new(),
            container: None,
            env: HashMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn needs(mut self, job: impl Into<String>) -> Self {
        self.needs.push(job.into());
        self
    }

    pub fn when(mut self, trigger: Trigger) -> Self {
        self.when = trigger;
        self
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.services.push(service.into());
        self
    }

    pub fn container(mut self, image: impl Into<String>) -> Self {
        self.container = Some(image.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Secrets needed by any step of this job
    pub fn required_secrets(&self) -> BTreeSet<SecretKind> {
        self.steps
            .iter()
            .flat_map(|s| s.required_secrets())
            .collect()
    }
}

/// A single command execution within a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    pub action: StepAction,
    /// Step-level overrides of pipeline and job environment
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Services that must be ready before this step executes
    #[serde(default)]
    pub services: Vec<String>,
    /// Secrets injected into this step only
    #[serde(default)]
    pub secrets: Vec<SecretKind>,
}

impl StepDefinition {
    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_action(
            name,
            StepAction::Run {
                command: command.into(),
            },
        )
    }

    pub fn publish(name: impl Into<String>, spec: PublishSpec) -> Self {
        Self::with_action(name, StepAction::Publish(spec))
    }

    pub fn deploy(name: impl Into<String>, spec: DeploySpec) -> Self {
        Self::with_action(name, StepAction::Deploy(spec))
    }

    fn with_action(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            env: HashMap::new(),
            services: Vec::new(),
            secrets: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn needs_service(mut self, service: impl Into<String>) -> Self {
        self.services.push(service.into());
        self
    }

    pub fn needs_secret(mut self, secret: SecretKind) -> Self {
        self.secrets.push(secret);
        self
    }

    /// Declared secrets plus the ones implied by the action
    pub fn required_secrets(&self) -> BTreeSet<SecretKind> {
        let mut secrets: BTreeSet<SecretKind> = self.secrets.iter().copied().collect();
        match self.action {
            StepAction::Publish(_) => {
                secrets.insert(SecretKind::RegistryCredentials);
            }
            StepAction::Deploy(_) => {
                secrets.insert(SecretKind::DeployKey);
            }
            StepAction::Run { .. } => {}
        }
        secrets
    }
}

/// What a step does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Run a shell command
    Run { command: String },
    /// Build and push a container image
    Publish(PublishSpec),
    /// Roll out the published image on the remote host
    Deploy(DeploySpec),
}

/// Image build-and-push parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishSpec {
    /// Build context directory
    pub context: String,
    pub dockerfile: Option<String>,
    /// Repository override (`registry/name`); configuration default when absent
    pub image: Option<String>,
    /// Floating alias overwritten by every run
    pub alias: String,
    /// Tags pushed in addition to the alias and the revision id
    #[serde(default)]
    pub extra_tags: Vec<String>,
}

impl Default for PublishSpec {
    fn default() -> Self {
        Self {
            context: ".".to_string(),
            dockerfile: None,
            image: None,
            alias: "latest".to_string(),
            extra_tags: Vec::new(),
        }
    }
}

/// Remote rollout parameters; unset fields fall back to configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploySpec {
    pub directory: Option<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub compose_file: Option<String>,
    /// Tag to start; defaults to the alias of the artifact published earlier in the job
    pub tag: Option<String>,
}

/// Job run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Succeeded => write!(f, "Succeeded"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::Skipped => write!(f, "Skipped"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Terminal status of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

/// Output of a single command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub exit_code: i32,
    pub logs: Vec<LogEntry>,
}

impl StepResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Record of one step within a job run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub result: Option<StepResult>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Skipped,
            result: None,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }
}

/// Why a job run was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The trigger condition is false for the invocation event
    NotEligible,
    /// A dependency ended in a status other than Succeeded
    DependencyNotSucceeded { dependency: String, status: JobStatus },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotEligible => write!(f, "not eligible for this event"),
            SkipReason::DependencyNotSucceeded { dependency, status } => {
                write!(f, "dependency '{}' ended {}", dependency, status)
            }
        }
    }
}

/// Why a job run failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    /// A backing service never became healthy within its retry budget
    ReadinessTimeout {
        step: String,
        service: String,
        attempts: u32,
    },
    /// A command exited with a non-zero status
    StepFailure { step: String, exit_code: i32 },
    /// Registry login, build or push failed
    Publish { step: String, message: String },
    /// Tunnel, session or remote command failed during rollout
    Deploy {
        step: String,
        operation: String,
        message: String,
    },
    /// The step could not be executed at all
    Execution { step: String, message: String },
}

impl JobFailure {
    pub fn step(&self) -> &str {
        match self {
            JobFailure::ReadinessTimeout { step, .. }
            | JobFailure::StepFailure { step, .. }
            | JobFailure::Publish { step, .. }
            | JobFailure::Deploy { step, .. }
            | JobFailure::Execution { step, .. } => step,
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobFailure::ReadinessTimeout {
                step,
                service,
                attempts,
            } => write!(
                f,
                "step '{}': service '{}' not ready after {} attempt(s)",
                step, service, attempts
            ),
            JobFailure::StepFailure { step, exit_code } => {
                write!(f, "step '{}' exited with code {}", step, exit_code)
            }
            JobFailure::Publish { step, message } => {
                write!(f, "step '{}': publish failed: {}", step, message)
            }
            JobFailure::Deploy {
                step,
                operation,
                message,
            } => write!(
                f,
                "step '{}': deploy operation '{}' failed: {}",
                step, operation, message
            ),
            JobFailure::Execution { step, message } => {
                write!(f, "step '{}' could not run: {}", step, message)
            }
        }
    }
}

/// One job's execution within an invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job: String,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    pub failure: Option<JobFailure>,
    pub skip_reason: Option<SkipReason>,
    /// Image published by this run, if any
    pub artifact: Option<Artifact>,
}

impl JobRun {
    pub fn pending(job: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job: job.into(),
            status: JobStatus::Pending,
            started_at: None,
            ended_at: None,
            steps: Vec::new(),
            failure: None,
            skip_reason: None,
            artifact: None,
        }
    }

    pub fn skip(&mut self, reason: SkipReason) {
        self.status = JobStatus::Skipped;
        self.skip_reason = Some(reason);
        self.ended_at = Some(Utc::now());
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.ended_at = Some(Utc::now());
    }

    /// Duration in seconds between start and end, if both are known
    pub fn duration_secs(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end.signed_duration_since(start).num_seconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_secrets_implied_by_action() {
        let job = JobDefinition::new("deploy")
            .step(StepDefinition::run("checkout", "git status"))
            .step(StepDefinition::publish("image", PublishSpec::default()))
            .step(StepDefinition::deploy("rollout", DeploySpec::default()));

        let secrets = job.required_secrets();
        assert!(secrets.contains(&SecretKind::RegistryCredentials));
        assert!(secrets.contains(&SecretKind::DeployKey));
    }

    #[test]
    fn test_run_step_needs_no_secret_unless_declared() {
        let step = StepDefinition::run("lint", "npm run lint");
        assert!(step.required_secrets().is_empty());

        let step = step.needs_secret(SecretKind::RegistryCredentials);
        assert_eq!(step.required_secrets().len(), 1);
    }

    #[test]
    fn test_job_run_lifecycle() {
        let mut run = JobRun::pending("build-test-lint");
        assert_eq!(run.status, JobStatus::Pending);
        assert!(!run.status.is_terminal());

        run.start();
        assert_eq!(run.status, JobStatus::Running);
        assert!(run.started_at.is_some());

        run.cancel();
        assert!(run.status.is_terminal());
        assert!(run.duration_secs().is_some());
    }

    #[test]
    fn test_skip_records_reason() {
        let mut run = JobRun::pending("deploy");
        run.skip(SkipReason::DependencyNotSucceeded {
            dependency: "build".to_string(),
            status: JobStatus::Failed,
        });
        assert_eq!(run.status, JobStatus::Skipped);
        assert_eq!(
            run.skip_reason.as_ref().unwrap().to_string(),
            "dependency 'build' ended Failed"
        );
        assert!(run.started_at.is_none());
    }

    #[test]
    fn test_failure_names_step() {
        let failure = JobFailure::Deploy {
            step: "rollout".to_string(),
            operation: "stop-stack".to_string(),
            message: "exit 1".to_string(),
        };
        assert_eq!(failure.step(), "rollout");
        assert!(failure.to_string().contains("stop-stack"));
    }
}
