//! Stage runner
//!
//! Executes the steps of one job strictly in declaration order. The first
//! failing step fails the job and every later step is recorded as Skipped;
//! side effects of earlier steps are left in place.
//!
//! Step environment, lowest to highest precedence:
//! 1. values from the runner configuration (`VERSION`, `DATABASE_URL`, ...) and `COMMIT_SHA` from the event
//! 2. pipeline `env`
//! 3. job `env`
//! 4. step `env`
//!
//! Secret variables are added on top, only for steps that declare them.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use sluice_core::domain::artifact::Artifact;
use sluice_core::domain::event::Event;
use sluice_core::domain::job::{
    DeploySpec, JobDefinition, JobFailure, JobStatus, PublishSpec, StepAction, StepDefinition,
    StepRecord, StepResult, StepStatus,
};
use sluice_core::domain::log::{LogEntry, LogLevel};
use sluice_core::domain::secrets::{SecretKind, Secrets};
use sluice_core::domain::service::BackingService;

use crate::config::Config;
use crate::deploy::{DeployResult, RolloutPlan};
use crate::executor::CommandExecutor;
use crate::log_buffer::LogBufferService;
use crate::publish::PublishRequest;
use crate::readiness::ServiceGates;
use crate::runtime::Runtime;

/// Everything a job run needs besides its definition
pub struct JobContext {
    pub run_id: Uuid,
    pub event: Event,
    pub pipeline_env: HashMap<String, String>,
    /// Backing services the job declares
    pub services: Vec<BackingService>,
    job: String,
    logs: Arc<dyn LogBufferService>,
    redactions: Vec<String>,
}

impl JobContext {
    pub fn new(
        run_id: Uuid,
        job: &str,
        event: Event,
        logs: Arc<dyn LogBufferService>,
        secrets: &Secrets,
    ) -> Self {
        Self {
            run_id,
            event,
            pipeline_env: HashMap::new(),
            services: Vec::new(),
            job: job.to_string(),
            logs,
            redactions: secret_values(secrets),
        }
    }

    pub fn with_pipeline_env(mut self, env: HashMap<String, String>) -> Self {
        self.pipeline_env = env;
        self
    }

    pub fn with_services(mut self, services: Vec<BackingService>) -> Self {
        self.services = services;
        self
    }

    /// Adds an entry to the invocation log with secret values masked
    pub fn add_log(&self, mut entry: LogEntry) {
        for value in &self.redactions {
            if entry.message.contains(value.as_str()) {
                entry.message = entry.message.replace(value.as_str(), "***");
            }
        }
        self.logs.add_entry(&self.job, entry);
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.add_log(LogEntry::info(message));
    }

    pub fn log_warning(&self, message: impl Into<String>) {
        self.add_log(LogEntry::warning(message));
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.add_log(LogEntry::error(message));
    }
}

/// Strings that must never reach the log
fn secret_values(secrets: &Secrets) -> Vec<String> {
    let mut values = Vec::new();
    if let Some(registry) = secrets.registry.as_ref().filter(|r| !r.token.is_empty()) {
        values.push(registry.token.clone());
    }
    if let Some(key) = &secrets.deploy_key {
        values.extend(
            key.expose()
                .lines()
                .map(str::trim)
                .filter(|l| l.len() >= 8)
                .map(str::to_string),
        );
    }
    values
}

/// Terminal result of running a job's steps
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// Succeeded or Failed
    pub status: JobStatus,
    pub steps: Vec<StepRecord>,
    pub failure: Option<JobFailure>,
    pub artifact: Option<Artifact>,
}

/// A step that did not succeed, with whatever output it produced
struct StepError {
    failure: JobFailure,
    result: Option<StepResult>,
}

impl StepError {
    fn new(failure: JobFailure) -> Self {
        Self {
            failure,
            result: None,
        }
    }
}

pub struct StageRunner {
    runtime: Runtime,
}

impl StageRunner {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    /// Runs every step of `job` in order on a single worker
    pub async fn run(&self, job: &JobDefinition, ctx: &JobContext) -> JobOutcome {
        info!("Running job '{}' ({})", job.name, ctx.run_id);
        ctx.log_info(format!("Job '{}' started", job.name));

        // Polling starts now so readiness overlaps with steps that do not
        // consume the services
        let gates = ServiceGates::start(&ctx.services, self.runtime.probes.as_ref(), self.runtime.gate);

        let mut worker = Worker {
            runtime: &self.runtime,
            job,
            ctx,
            gates: &gates,
            executor: None,
            artifact: None,
        };

        let mut steps = Vec::with_capacity(job.steps.len());
        for (i, step) in job.steps.iter().enumerate() {
            let started_at = Utc::now();
            ctx.log_info(format!("Step '{}'", step.name));

            match worker.run_step(step).await {
                Ok(result) => steps.push(StepRecord {
                    name: step.name.clone(),
                    status: StepStatus::Succeeded,
                    result: Some(result),
                    error: None,
                    started_at: Some(started_at),
                    ended_at: Some(Utc::now()),
                }),
                Err(StepError { failure, result }) => {
                    error!("Job '{}' failed: {}", job.name, failure);
                    ctx.log_error(failure.to_string());

                    steps.push(StepRecord {
                        name: step.name.clone(),
                        status: StepStatus::Failed,
                        result,
                        error: Some(failure.to_string()),
                        started_at: Some(started_at),
                        ended_at: Some(Utc::now()),
                    });
                    for remaining in &job.steps[i + 1..] {
                        steps.push(StepRecord::skipped(remaining.name.clone()));
                    }

                    return JobOutcome {
                        status: JobStatus::Failed,
                        steps,
                        failure: Some(failure),
                        artifact: worker.artifact,
                    };
                }
            }
        }

        ctx.log_info(format!("Job '{}' succeeded", job.name));
        JobOutcome {
            status: JobStatus::Succeeded,
            steps,
            failure: None,
            artifact: worker.artifact,
        }
    }
}

/// State carried from one step of a job to the next
struct Worker<'a> {
    runtime: &'a Runtime,
    job: &'a JobDefinition,
    ctx: &'a JobContext,
    gates: &'a ServiceGates,
    /// Created on the first `run` step
    executor: Option<Arc<dyn CommandExecutor>>,
    /// Published by an earlier step of this job
    artifact: Option<Artifact>,
}

impl Worker<'_> {
    async fn run_step(&mut self, step: &StepDefinition) -> Result<StepResult, StepError> {
        if let Err(unready) = self.gates.wait_all(&step.services).await {
            return Err(StepError::new(JobFailure::ReadinessTimeout {
                step: step.name.clone(),
                service: unready.service,
                attempts: unready.attempts,
            }));
        }

        match &step.action {
            StepAction::Run { command } => self.run_command(step, command).await,
            StepAction::Publish(spec) => self.publish(step, spec).await,
            StepAction::Deploy(spec) => self.deploy(step, spec).await,
        }
    }

    async fn run_command(&mut self, step: &StepDefinition, command: &str) -> Result<StepResult, StepError> {
        let execution = |message: String| {
            StepError::new(JobFailure::Execution {
                step: step.name.clone(),
                message,
            })
        };

        let executor = match &self.executor {
            Some(executor) => executor.clone(),
            None => {
                let executor = self
                    .runtime
                    .executors
                    .for_job(self.ctx.run_id, self.job)
                    .await
                    .map_err(|e| execution(format!("{:#}", e)))?;
                self.executor = Some(executor.clone());
                executor
            }
        };

        let env = step_env(
            &self.runtime.config,
            &self.runtime.secrets,
            &self.ctx.event,
            &self.ctx.pipeline_env,
            self.job,
            step,
        );

        let output = executor
            .execute(command, &env)
            .await
            .map_err(|e| execution(format!("{:#}", e)))?;

        let logs = output.log_entries();
        for entry in &logs {
            self.ctx.add_log(entry.clone());
        }

        let result = StepResult {
            exit_code: output.exit_code,
            logs,
        };

        if result.success() {
            Ok(result)
        } else {
            Err(StepError {
                failure: JobFailure::StepFailure {
                    step: step.name.clone(),
                    exit_code: output.exit_code,
                },
                result: Some(result),
            })
        }
    }

    async fn publish(&mut self, step: &StepDefinition, spec: &PublishSpec) -> Result<StepResult, StepError> {
        let failed = |message: String| {
            StepError::new(JobFailure::Publish {
                step: step.name.clone(),
                message,
            })
        };

        let credentials = self
            .runtime
            .secrets
            .registry
            .as_ref()
            .ok_or_else(|| failed("registry credentials are not available".to_string()))?;

        let config = &self.runtime.config;
        let revision = &self.ctx.event.revision;

        let request = PublishRequest {
            context: config.workspace.join(&spec.context),
            dockerfile: spec.dockerfile.as_ref().map(|d| config.workspace.join(d)),
            repository: spec.image.clone().unwrap_or_else(|| config.repository()),
            tags: PublishRequest::tag_set(&spec.alias, revision, &spec.extra_tags),
        };

        let artifact = self
            .runtime
            .publisher
            .publish(&request, credentials)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let mut logs = Vec::new();
        for reference in artifact.references() {
            let entry = LogEntry::info(format!("Pushed {}", reference));
            self.ctx.add_log(entry.clone());
            logs.push(entry);
        }

        self.artifact = Some(artifact);
        Ok(StepResult { exit_code: 0, logs })
    }

    async fn deploy(&mut self, step: &StepDefinition, spec: &DeploySpec) -> Result<StepResult, StepError> {
        let Some(key) = self.runtime.secrets.deploy_key.as_ref() else {
            return Err(StepError::new(JobFailure::Deploy {
                step: step.name.clone(),
                operation: "connect".to_string(),
                message: "deploy key is not available".to_string(),
            }));
        };

        let tag = spec
            .tag
            .clone()
            .or_else(|| self.artifact.as_ref().and_then(|a| a.tags.first().cloned()))
            .unwrap_or_else(|| "latest".to_string());

        let plan = RolloutPlan::for_step(&self.runtime.config, spec, &tag);
        self.ctx.log_info(format!(
            "Rolling out {} in {} ({})",
            tag,
            plan.directory,
            plan.operations
                .iter()
                .map(|op| op.name())
                .collect::<Vec<_>>()
                .join(", ")
        ));

        let mut logs = Vec::new();
        let mut record = |entry: LogEntry| {
            self.ctx.add_log(entry.clone());
            logs.push(entry);
        };

        match self.runtime.deployer.deploy(&plan, key).await {
            DeployResult::Succeeded { operations } => {
                for report in operations {
                    record(LogEntry::info(format!("{} done", report.operation)));
                    report.output.log_entries().into_iter().for_each(&mut record);
                }
                Ok(StepResult { exit_code: 0, logs })
            }
            DeployResult::Failed(failure) => {
                for report in &failure.completed {
                    record(LogEntry::info(format!("{} done", report.operation)));
                }

                let mut message = failure.message.clone();
                if let Some(code) = failure.exit_code {
                    message = format!("exit code {}: {}", code, message);
                }
                if let Some(command) = &failure.command {
                    message = format!("{} (remote command: {})", message, command);
                }
                record(LogEntry::new(
                    LogLevel::Error,
                    format!("{} failed: {}", failure.operation, message),
                ));

                Err(StepError {
                    failure: JobFailure::Deploy {
                        step: step.name.clone(),
                        operation: failure.operation,
                        message,
                    },
                    result: Some(StepResult {
                        exit_code: failure.exit_code.unwrap_or(-1),
                        logs,
                    }),
                })
            }
        }
    }
}

/// Environment of one step, including the secrets it declared
pub fn step_env(
    config: &Config,
    secrets: &Secrets,
    event: &Event,
    pipeline_env: &HashMap<String, String>,
    job: &JobDefinition,
    step: &StepDefinition,
) -> HashMap<String, String> {
    let mut env = config.step_env(event);
    env.extend(pipeline_env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    for kind in step.required_secrets() {
        match kind {
            SecretKind::RegistryCredentials => {
                if let Some(registry) = &secrets.registry {
                    env.insert("REGISTRY_USERNAME".to_string(), registry.username.clone());
                    env.insert("REGISTRY_TOKEN".to_string(), registry.token.clone());
                }
            }
            SecretKind::DeployKey => {
                if let Some(key) = &secrets.deploy_key {
                    env.insert("SSH_PRIVATE_KEY".to_string(), key.expose().to_string());
                }
            }
        }
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorFactory;
    use crate::log_buffer::InMemoryLogBuffer;
    use crate::readiness::{HealthProbe, ProbeFactory, ReadinessGate};
    use crate::shell::CommandOutput;
    use async_trait::async_trait;
    use sluice_core::domain::secrets::{DeployKey, RegistryCredentials};
    use sluice_core::domain::service::ProbeSpec;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records commands and fails the ones containing "false"
    #[derive(Default)]
    struct ScriptedShell {
        executed: Mutex<Vec<(String, HashMap<String, String>)>>,
    }

    #[async_trait]
    impl CommandExecutor for ScriptedShell {
        async fn execute(&self, command: &str, env: &HashMap<String, String>) -> anyhow::Result<CommandOutput> {
            self.executed
                .lock()
                .unwrap()
                .push((command.to_string(), env.clone()));
            Ok(CommandOutput {
                stdout: format!("ran {}\n", command),
                stderr: String::new(),
                exit_code: if command.contains("false") { 2 } else { 0 },
            })
        }
    }

    struct SharedShell(Arc<ScriptedShell>);

    #[async_trait]
    impl ExecutorFactory for SharedShell {
        async fn for_job(&self, _run_id: Uuid, _job: &JobDefinition) -> anyhow::Result<Arc<dyn CommandExecutor>> {
            Ok(self.0.clone())
        }
    }

    struct DownProbe;

    #[async_trait]
    impl HealthProbe for DownProbe {
        async fn check(&self) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    struct DownProbes;

    impl ProbeFactory for DownProbes {
        fn probe(&self, _spec: &ProbeSpec) -> Arc<dyn HealthProbe> {
            Arc::new(DownProbe)
        }
    }

    fn secrets() -> Secrets {
        Secrets {
            registry: Some(RegistryCredentials {
                username: "ci-bot".to_string(),
                token: "registry-token-value".to_string(),
            }),
            deploy_key: Some(DeployKey::new("PRIVATE-KEY-MATERIAL")),
        }
    }

    fn runner(shell: &Arc<ScriptedShell>) -> StageRunner {
        let runtime = Runtime::standard(Config::default(), secrets())
            .with_executors(Arc::new(SharedShell(shell.clone())))
            .with_probes(Arc::new(DownProbes))
            .with_gate(ReadinessGate::with_probe_timeout(Duration::from_millis(50)));
        StageRunner::new(runtime)
    }

    fn context(job: &str, logs: &InMemoryLogBuffer) -> JobContext {
        JobContext::new(
            Uuid::new_v4(),
            job,
            Event::push("main", "abc123"),
            Arc::new(logs.clone()),
            &secrets(),
        )
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let shell = Arc::new(ScriptedShell::default());
        let logs = InMemoryLogBuffer::new();
        let job = JobDefinition::new("check")
            .step(StepDefinition::run("install", "npm ci"))
            .step(StepDefinition::run("lint", "npm run lint"))
            .step(StepDefinition::run("test", "npm test"));

        let outcome = runner(&shell).run(&job, &context("check", &logs)).await;

        assert_eq!(outcome.status, JobStatus::Succeeded);
        let commands: Vec<String> = shell.executed.lock().unwrap().iter().map(|(c, _)| c.clone()).collect();
        assert_eq!(commands, vec!["npm ci", "npm run lint", "npm test"]);
        assert!(outcome.steps.iter().all(|s| s.status == StepStatus::Succeeded));
        assert!(logs.snapshot().iter().any(|l| l.entry.message == "ran npm test"));
    }

    #[tokio::test]
    async fn test_first_failure_skips_remaining_steps() {
        let shell = Arc::new(ScriptedShell::default());
        let logs = InMemoryLogBuffer::new();
        let job = JobDefinition::new("check")
            .step(StepDefinition::run("install", "npm ci"))
            .step(StepDefinition::run("lint", "false"))
            .step(StepDefinition::run("test", "npm test"));

        let outcome = runner(&shell).run(&job, &context("check", &logs)).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(
            outcome.failure,
            Some(JobFailure::StepFailure {
                step: "lint".to_string(),
                exit_code: 2
            })
        );
        let statuses: Vec<StepStatus> = outcome.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Skipped]
        );
        assert_eq!(shell.executed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unready_service_fails_consuming_step() {
        let shell = Arc::new(ScriptedShell::default());
        let logs = InMemoryLogBuffer::new();
        let database = BackingService::new(
            "database",
            ProbeSpec::Tcp {
                address: "127.0.0.1:5432".to_string(),
            },
        )
        .with_budget(Duration::from_millis(1), 3);

        let job = JobDefinition::new("check")
            .service("database")
            .step(StepDefinition::run("install", "npm ci"))
            .step(StepDefinition::run("test", "npm test").needs_service("database"));

        let ctx = context("check", &logs).with_services(vec![database]);
        let outcome = runner(&shell).run(&job, &ctx).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(
            outcome.failure,
            Some(JobFailure::ReadinessTimeout {
                step: "test".to_string(),
                service: "database".to_string(),
                attempts: 3
            })
        );
        // The step that does not consume the service ran
        assert_eq!(shell.executed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_secrets_only_reach_declaring_steps() {
        let shell = Arc::new(ScriptedShell::default());
        let logs = InMemoryLogBuffer::new();
        let job = JobDefinition::new("ship")
            .step(StepDefinition::run("build", "make"))
            .step(StepDefinition::run("login", "echo registry-token-value").needs_secret(SecretKind::RegistryCredentials));

        runner(&shell).run(&job, &context("ship", &logs)).await;

        let executed = shell.executed.lock().unwrap();
        assert!(!executed[0].1.contains_key("REGISTRY_TOKEN"));
        assert_eq!(executed[1].1["REGISTRY_TOKEN"], "registry-token-value");
        assert!(!executed[1].1.contains_key("SSH_PRIVATE_KEY"));

        // Echoed secret is masked in the log
        assert!(
            logs.snapshot()
                .iter()
                .all(|l| !l.entry.message.contains("registry-token-value"))
        );
    }

    #[test]
    fn test_env_layering() {
        let config = Config::default();
        let event = Event::push("main", "abc123");
        let mut pipeline_env = HashMap::new();
        pipeline_env.insert("NODE_ENV".to_string(), "test".to_string());
        pipeline_env.insert("VERSION".to_string(), "pipeline".to_string());

        let job = JobDefinition::new("check").env("NODE_ENV", "ci").env("JOB_ONLY", "1");
        let step = StepDefinition::run("test", "npm test").env("NODE_ENV", "step");

        let env = step_env(&config, &Secrets::default(), &event, &pipeline_env, &job, &step);
        assert_eq!(env["NODE_ENV"], "step");
        assert_eq!(env["VERSION"], "pipeline");
        assert_eq!(env["JOB_ONLY"], "1");
        assert_eq!(env["COMMIT_SHA"], "abc123");
    }
}
