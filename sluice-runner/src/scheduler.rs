//! Pipeline scheduler
//!
//! Drives one invocation over the job graph. After every job completion the
//! pending jobs are resolved again until nothing changes: ineligible jobs
//! and jobs behind a dependency that did not succeed are skipped, jobs
//! whose dependencies all succeeded are started. Independent jobs run
//! concurrently, each in its own task.
//!
//! Cancellation aborts every running job task (killing its child processes
//! and closing any deploy session) and marks every pending or running job
//! run Cancelled.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sluice_core::domain::event::Event;
use sluice_core::domain::job::{JobFailure, JobRun, JobStatus};
use sluice_core::domain::pipeline::{InvocationStatus, PipelineDefinition, PipelineReport};
use sluice_core::{ConfigurationError, JobGraph, Resolution};

use crate::cancel::CancelSignal;
use crate::log_buffer::LogBufferService;
use crate::runtime::Runtime;
use crate::stage::{JobContext, JobOutcome, StageRunner};

/// Receives the report every time a job run changes state
pub trait ReportObserver: Send + Sync {
    fn on_update(&self, report: &PipelineReport);
}

impl<F> ReportObserver for F
where
    F: Fn(&PipelineReport) + Send + Sync,
{
    fn on_update(&self, report: &PipelineReport) {
        self(report)
    }
}

pub struct NoopObserver;

impl ReportObserver for NoopObserver {
    fn on_update(&self, _report: &PipelineReport) {}
}

/// Executes invocations of one validated pipeline
pub struct PipelineExecutor {
    pipeline: Arc<PipelineDefinition>,
    graph: JobGraph,
    runtime: Runtime,
}

impl PipelineExecutor {
    /// Validates the job graph; a configuration error here means no job
    /// run is ever created
    pub fn new(pipeline: PipelineDefinition, runtime: Runtime) -> Result<Self, ConfigurationError> {
        let graph = JobGraph::from_pipeline(&pipeline)?;
        Ok(Self {
            pipeline: Arc::new(pipeline),
            graph,
            runtime,
        })
    }

    pub fn pipeline(&self) -> &PipelineDefinition {
        &self.pipeline
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    /// Runs one invocation to completion or cancellation
    pub async fn execute(
        &self,
        invocation_id: Uuid,
        event: Event,
        mut cancel: CancelSignal,
        logs: Arc<dyn LogBufferService>,
        observer: &dyn ReportObserver,
    ) -> PipelineReport {
        info!(
            "Invocation {} of '{}' for {} on {} ({})",
            invocation_id,
            self.pipeline.name,
            event.kind,
            event.branch,
            event.short_revision()
        );

        let mut report = PipelineReport {
            invocation_id,
            pipeline: self.pipeline.name.clone(),
            event: event.clone(),
            status: InvocationStatus::Running,
            runs: self.graph.order().map(|j| JobRun::pending(&j.name)).collect(),
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        };

        if let Err(e) = self.graph.check_secrets(&event, &self.runtime.secrets) {
            error!("Invocation {} rejected: {}", invocation_id, e);
            report.runs.clear();
            report.status = InvocationStatus::Rejected;
            report.error = Some(e.to_string());
            report.ended_at = Some(Utc::now());
            observer.on_update(&report);
            return report;
        }

        let runner = Arc::new(StageRunner::new(self.runtime.clone()));
        let mut statuses: HashMap<String, JobStatus> = report
            .runs
            .iter()
            .map(|r| (r.job.clone(), r.status))
            .collect();
        let mut tasks: JoinSet<(String, JobOutcome)> = JoinSet::new();
        let mut task_jobs: HashMap<tokio::task::Id, String> = HashMap::new();

        loop {
            if cancel.is_cancelled() {
                self.cancel_all(&mut tasks, &mut report).await;
                break;
            }

            // Resolve pending jobs until a pass changes nothing
            loop {
                let mut changed = false;
                for job in self.graph.order() {
                    if statuses.get(&job.name) != Some(&JobStatus::Pending) {
                        continue;
                    }
                    match self.graph.resolve(&job.name, &statuses, &event) {
                        Resolution::Wait => {}
                        Resolution::Skip(reason) => {
                            info!("Job '{}' skipped: {}", job.name, reason);
                            if let Some(run) = run_mut(&mut report, &job.name) {
                                run.skip(reason);
                            }
                            statuses.insert(job.name.clone(), JobStatus::Skipped);
                            changed = true;
                        }
                        Resolution::Start => {
                            let Some(run) = run_mut(&mut report, &job.name) else {
                                continue;
                            };
                            run.start();
                            let run_id = run.id;
                            statuses.insert(job.name.clone(), JobStatus::Running);

                            let ctx = JobContext::new(
                                run_id,
                                &job.name,
                                event.clone(),
                                logs.clone(),
                                &self.runtime.secrets,
                            )
                            .with_pipeline_env(self.pipeline.env.clone())
                            .with_services(
                                job.services
                                    .iter()
                                    .filter_map(|s| self.pipeline.service(s).cloned())
                                    .collect(),
                            );

                            let runner = runner.clone();
                            let job = job.clone();
                            let name = job.name.clone();
                            let handle = tasks.spawn(async move {
                                let outcome = runner.run(&job, &ctx).await;
                                (job.name, outcome)
                            });
                            task_jobs.insert(handle.id(), name);
                            changed = true;
                        }
                    }
                }
                if !changed {
                    break;
                }
            }

            observer.on_update(&report);

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next_with_id() => match joined {
                    Some(Ok((id, (name, outcome)))) => {
                        task_jobs.remove(&id);
                        debug!("Job '{}' finished: {}", name, outcome.status);
                        statuses.insert(name.clone(), outcome.status);
                        if let Some(run) = run_mut(&mut report, &name) {
                            run.status = outcome.status;
                            run.steps = outcome.steps;
                            run.failure = outcome.failure;
                            run.artifact = outcome.artifact;
                            run.ended_at = Some(Utc::now());
                        }
                    }
                    Some(Err(e)) => {
                        let Some(name) = task_jobs.remove(&e.id()) else {
                            warn!("Unknown job task ended: {}", e);
                            continue;
                        };
                        error!("Job '{}' task ended abnormally: {}", name, e);
                        statuses.insert(name.clone(), JobStatus::Failed);
                        if let Some(run) = run_mut(&mut report, &name) {
                            run.status = JobStatus::Failed;
                            run.failure = Some(JobFailure::Execution {
                                step: name.clone(),
                                message: format!("job task ended abnormally: {}", e),
                            });
                            run.ended_at = Some(Utc::now());
                        }
                    }
                    None => break,
                },
                _ = cancel.cancelled() => {
                    self.cancel_all(&mut tasks, &mut report).await;
                    break;
                }
            }
        }

        report.status = InvocationStatus::from_runs(&report.runs);
        report.ended_at = Some(Utc::now());
        info!("Invocation {} finished: {}", invocation_id, report.status);
        observer.on_update(&report);
        report
    }

    async fn cancel_all(
        &self,
        tasks: &mut JoinSet<(String, JobOutcome)>,
        report: &mut PipelineReport,
    ) {
        warn!("Invocation {} cancelled", report.invocation_id);

        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        for run in &mut report.runs {
            if matches!(run.status, JobStatus::Pending | JobStatus::Running) {
                run.cancel();
            }
        }
    }
}

fn run_mut<'a>(report: &'a mut PipelineReport, job: &str) -> Option<&'a mut JobRun> {
    report.runs.iter_mut().find(|r| r.job == job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelHandle;
    use crate::config::Config;
    use crate::deploy::{DeployError, RemoteShell, SessionFactory};
    use crate::executor::{CommandExecutor, ExecutorFactory};
    use crate::log_buffer::InMemoryLogBuffer;
    use crate::publish::ContainerEngine;
    use crate::readiness::{HealthProbe, ProbeFactory, ReadinessGate};
    use crate::shell::CommandOutput;
    use async_trait::async_trait;
    use sluice_core::Trigger;
    use sluice_core::domain::job::{DeploySpec, JobDefinition, PublishSpec, SkipReason, StepDefinition};
    use sluice_core::domain::secrets::{DeployKey, RegistryCredentials, Secrets};
    use sluice_core::domain::service::{BackingService, ProbeSpec};
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Barrier;

    const TRUNK: &str = "main";

    /// Fails commands containing "false", blocks on "hang", meets the
    /// other job on "rendezvous"
    struct FakeShell {
        executed: Mutex<Vec<String>>,
        barrier: Barrier,
    }

    #[async_trait]
    impl CommandExecutor for FakeShell {
        async fn execute(&self, command: &str, _env: &HashMap<String, String>) -> anyhow::Result<CommandOutput> {
            self.executed.lock().unwrap().push(command.to_string());
            if command.contains("hang") {
                std::future::pending::<()>().await;
            }
            if command.contains("rendezvous") {
                self.barrier.wait().await;
            }
            Ok(CommandOutput {
                exit_code: if command.contains("false") { 1 } else { 0 },
                ..Default::default()
            })
        }
    }

    struct FakeExecutors(Arc<FakeShell>);

    #[async_trait]
    impl ExecutorFactory for FakeExecutors {
        async fn for_job(&self, _run_id: Uuid, _job: &JobDefinition) -> anyhow::Result<Arc<dyn CommandExecutor>> {
            Ok(self.0.clone())
        }
    }

    /// Database probe that succeeds on the `ready_on`-th attempt, if ever
    struct FakeDatabase {
        ready_on: Option<u32>,
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl HealthProbe for FakeDatabase {
        async fn check(&self) -> anyhow::Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.ready_on {
                Some(n) if attempt >= n => Ok(()),
                _ => anyhow::bail!("connection refused"),
            }
        }
    }

    struct FakeProbes {
        ready_on: Option<u32>,
        attempts: Arc<AtomicU32>,
    }

    impl ProbeFactory for FakeProbes {
        fn probe(&self, _spec: &ProbeSpec) -> Arc<dyn HealthProbe> {
            Arc::new(FakeDatabase {
                ready_on: self.ready_on,
                attempts: self.attempts.clone(),
            })
        }
    }

    #[derive(Default)]
    struct FakeEngine {
        pushed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn login(&self, _registry: &str, _credentials: &RegistryCredentials) -> anyhow::Result<()> {
            Ok(())
        }

        async fn build(&self, _context: &Path, _dockerfile: Option<&Path>, _references: &[String]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn push(&self, reference: &str) -> anyhow::Result<()> {
            self.pushed.lock().unwrap().push(reference.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeHost {
        commands: Mutex<Vec<String>>,
    }

    struct FakeSession(Arc<FakeHost>);

    #[async_trait]
    impl RemoteShell for FakeSession {
        async fn run(&self, command: &str) -> Result<CommandOutput, DeployError> {
            self.0.commands.lock().unwrap().push(command.to_string());
            Ok(CommandOutput::default())
        }
    }

    #[async_trait]
    impl SessionFactory for Arc<FakeHost> {
        async fn open(&self, _key: &DeployKey) -> Result<Box<dyn RemoteShell>, DeployError> {
            Ok(Box::new(FakeSession(self.clone())))
        }
    }

    struct Harness {
        shell: Arc<FakeShell>,
        engine: Arc<FakeEngine>,
        host: Arc<FakeHost>,
        probe_attempts: Arc<AtomicU32>,
        runtime: Runtime,
    }

    impl Harness {
        fn new(database_ready_on: Option<u32>, secrets: Secrets) -> Self {
            let shell = Arc::new(FakeShell {
                executed: Mutex::new(Vec::new()),
                barrier: Barrier::new(2),
            });
            let engine = Arc::new(FakeEngine::default());
            let host = Arc::new(FakeHost::default());
            let probe_attempts = Arc::new(AtomicU32::new(0));

            let runtime = Runtime::standard(Config::default(), secrets)
                .with_executors(Arc::new(FakeExecutors(shell.clone())))
                .with_probes(Arc::new(FakeProbes {
                    ready_on: database_ready_on,
                    attempts: probe_attempts.clone(),
                }))
                .with_gate(ReadinessGate::with_probe_timeout(Duration::from_millis(100)))
                .with_engine(engine.clone())
                .with_sessions(Arc::new(host.clone()));

            Self {
                shell,
                engine,
                host,
                probe_attempts,
                runtime,
            }
        }

        fn executed(&self) -> Vec<String> {
            self.shell.executed.lock().unwrap().clone()
        }

        async fn run(&self, pipeline: PipelineDefinition, event: Event) -> PipelineReport {
            let executor = PipelineExecutor::new(pipeline, self.runtime.clone()).unwrap();
            executor
                .execute(
                    Uuid::new_v4(),
                    event,
                    CancelSignal::never(),
                    Arc::new(InMemoryLogBuffer::new()),
                    &NoopObserver,
                )
                .await
        }
    }

    fn all_secrets() -> Secrets {
        Secrets {
            registry: Some(RegistryCredentials {
                username: "ci-bot".to_string(),
                token: "token".to_string(),
            }),
            deploy_key: Some(DeployKey::new("key")),
        }
    }

    /// Build/test/lint job followed by the trunk-only deploy job
    fn pipeline(lint_command: &str) -> PipelineDefinition {
        let database = BackingService::new(
            "database",
            ProbeSpec::Postgres {
                url: "postgres://localhost/app".to_string(),
            },
        )
        .with_budget(Duration::from_millis(1), 5);

        let check = JobDefinition::new("check")
            .when(Trigger::integration(TRUNK))
            .service("database")
            .step(StepDefinition::run("install", "npm ci"))
            .step(StepDefinition::run("lint", lint_command))
            .step(StepDefinition::run("build", "npm run build"))
            .step(StepDefinition::run("test", "npm test").needs_service("database"));

        let deploy = JobDefinition::new("deploy")
            .needs("check")
            .when(Trigger::trunk_push(TRUNK))
            .step(StepDefinition::publish("image", PublishSpec::default()))
            .step(StepDefinition::deploy("rollout", DeploySpec::default()));

        PipelineDefinition {
            name: "app".to_string(),
            description: None,
            env: HashMap::new(),
            services: vec![database],
            jobs: vec![check, deploy],
        }
    }

    #[tokio::test]
    async fn test_trunk_push_builds_publishes_and_deploys() {
        let harness = Harness::new(Some(1), all_secrets());
        let report = harness
            .run(pipeline("npm run lint"), Event::push(TRUNK, "abc123"))
            .await;

        assert_eq!(report.status, InvocationStatus::Succeeded);
        assert_eq!(report.status_of("check"), Some(JobStatus::Succeeded));
        assert_eq!(report.status_of("deploy"), Some(JobStatus::Succeeded));

        let artifact = report.run("deploy").unwrap().artifact.clone().unwrap();
        assert_eq!(artifact.tags, vec!["latest", "abc123"]);
        assert_eq!(
            harness.engine.pushed.lock().unwrap().clone(),
            vec!["docker.io/app:latest", "docker.io/app:abc123"]
        );

        let commands = harness.host.commands.lock().unwrap().clone();
        let down = commands.iter().position(|c| c.ends_with(" down")).unwrap();
        let up = commands.iter().position(|c| c.ends_with(" up -d")).unwrap();
        assert!(down < up);
        assert!(commands[up].contains("IMAGE_TAG=latest"));
    }

    #[tokio::test]
    async fn test_each_push_is_tagged_with_its_own_revision() {
        let harness = Harness::new(Some(1), all_secrets());

        let first = harness
            .run(pipeline("npm run lint"), Event::push(TRUNK, "rev-one"))
            .await;
        let second = harness
            .run(pipeline("npm run lint"), Event::push(TRUNK, "rev-two"))
            .await;

        let tags = |report: &PipelineReport| report.run("deploy").unwrap().artifact.clone().unwrap().tags;
        assert_eq!(tags(&first), vec!["latest", "rev-one"]);
        assert_eq!(tags(&second), vec!["latest", "rev-two"]);

        let pushed = harness.engine.pushed.lock().unwrap().clone();
        assert!(pushed.contains(&"docker.io/app:rev-one".to_string()));
        assert!(pushed.contains(&"docker.io/app:rev-two".to_string()));
    }

    #[tokio::test]
    async fn test_proposed_merge_never_creates_deploy_run() {
        let harness = Harness::new(Some(1), all_secrets());
        let event = Event::proposed_merge("feature-x", "abc123").with_target(TRUNK);
        let report = harness.run(pipeline("npm run lint"), event).await;

        assert_eq!(report.status_of("check"), Some(JobStatus::Succeeded));
        let deploy = report.run("deploy").unwrap();
        assert_eq!(deploy.status, JobStatus::Skipped);
        assert_eq!(deploy.skip_reason, Some(SkipReason::NotEligible));
        assert!(deploy.started_at.is_none());
        assert!(harness.engine.pushed.lock().unwrap().is_empty());
        assert!(harness.host.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_proposed_merge_on_trunk_does_not_deploy() {
        let harness = Harness::new(Some(1), all_secrets());
        let report = harness
            .run(pipeline("npm run lint"), Event::proposed_merge(TRUNK, "abc123"))
            .await;

        assert_eq!(report.status_of("deploy"), Some(JobStatus::Skipped));
        assert!(harness.host.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_trunk_push_never_deploys() {
        for lint in ["npm run lint", "false"] {
            let harness = Harness::new(Some(1), all_secrets());
            let report = harness
                .run(pipeline(lint), Event::push("feature-x", "abc123"))
                .await;

            assert_eq!(report.status_of("deploy"), Some(JobStatus::Skipped));
            assert!(harness.host.commands.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_failed_check_skips_deploy() {
        let harness = Harness::new(Some(1), all_secrets());
        let report = harness
            .run(pipeline("false"), Event::push(TRUNK, "abc123"))
            .await;

        assert_eq!(report.status, InvocationStatus::Failed);
        let check = report.run("check").unwrap();
        assert_eq!(check.status, JobStatus::Failed);
        assert_eq!(check.failure.as_ref().unwrap().step(), "lint");

        let deploy = report.run("deploy").unwrap();
        assert_eq!(deploy.status, JobStatus::Skipped);
        assert_eq!(
            deploy.skip_reason,
            Some(SkipReason::DependencyNotSucceeded {
                dependency: "check".to_string(),
                status: JobStatus::Failed
            })
        );
        assert_eq!(harness.executed(), vec!["npm ci", "false"]);
    }

    #[tokio::test]
    async fn test_database_never_ready_fails_test_step() {
        let harness = Harness::new(None, all_secrets());
        let report = harness
            .run(pipeline("npm run lint"), Event::push(TRUNK, "abc123"))
            .await;

        let check = report.run("check").unwrap();
        assert_eq!(check.status, JobStatus::Failed);
        assert_eq!(
            check.failure,
            Some(JobFailure::ReadinessTimeout {
                step: "test".to_string(),
                service: "database".to_string(),
                attempts: 5
            })
        );
        assert_eq!(harness.probe_attempts.load(Ordering::SeqCst), 5);
        assert_eq!(report.status_of("deploy"), Some(JobStatus::Skipped));
        assert!(!harness.executed().contains(&"npm test".to_string()));
    }

    #[tokio::test]
    async fn test_missing_secret_rejects_before_any_run() {
        let harness = Harness::new(Some(1), Secrets::default());
        let report = harness
            .run(pipeline("npm run lint"), Event::push(TRUNK, "abc123"))
            .await;

        assert_eq!(report.status, InvocationStatus::Rejected);
        assert!(report.runs.is_empty());
        assert!(report.error.unwrap().contains("deploy"));
        assert!(harness.executed().is_empty());
    }

    #[tokio::test]
    async fn test_missing_secret_ignored_for_ineligible_job() {
        let harness = Harness::new(Some(1), Secrets::default());
        let event = Event::proposed_merge("feature-x", "abc123").with_target(TRUNK);
        let report = harness.run(pipeline("npm run lint"), event).await;

        assert_eq!(report.status, InvocationStatus::Succeeded);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let a = JobDefinition::new("a").needs("b").step(StepDefinition::run("s", "true"));
        let b = JobDefinition::new("b").needs("a").step(StepDefinition::run("s", "true"));
        let pipeline = PipelineDefinition {
            name: "cyclic".to_string(),
            description: None,
            env: HashMap::new(),
            services: Vec::new(),
            jobs: vec![a, b],
        };

        let harness = Harness::new(Some(1), all_secrets());
        let err = PipelineExecutor::new(pipeline, harness.runtime.clone()).err().unwrap();
        assert!(matches!(err, ConfigurationError::Cycle(_)));
    }

    #[tokio::test]
    async fn test_independent_jobs_run_concurrently() {
        let left = JobDefinition::new("left").step(StepDefinition::run("meet", "rendezvous left"));
        let right = JobDefinition::new("right").step(StepDefinition::run("meet", "rendezvous right"));
        let pipeline = PipelineDefinition {
            name: "fan-out".to_string(),
            description: None,
            env: HashMap::new(),
            services: Vec::new(),
            jobs: vec![left, right],
        };

        let harness = Harness::new(Some(1), all_secrets());
        // Each job blocks until the other one reached the same point
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            harness.run(pipeline, Event::push(TRUNK, "abc123")),
        )
        .await
        .expect("jobs did not run concurrently");

        assert_eq!(report.status, InvocationStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancel_marks_pending_and_running_cancelled() {
        let harness = Harness::new(Some(1), all_secrets());
        let executor = PipelineExecutor::new(pipeline("hang"), harness.runtime.clone()).unwrap();
        let (handle, signal) = CancelHandle::new();

        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let observer = move |report: &PipelineReport| {
            sink.lock().unwrap().push(report.status_of("check"));
        };

        let execution = executor.execute(
            Uuid::new_v4(),
            Event::push(TRUNK, "abc123"),
            signal,
            Arc::new(InMemoryLogBuffer::new()),
            &observer,
        );
        let cancel = async {
            while !harness.executed().contains(&"hang".to_string()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            handle.cancel();
        };

        let (report, ()) = tokio::join!(execution, cancel);

        assert_eq!(report.status, InvocationStatus::Cancelled);
        assert_eq!(report.status_of("check"), Some(JobStatus::Cancelled));
        assert_eq!(report.status_of("deploy"), Some(JobStatus::Cancelled));
        assert!(
            observed
                .lock()
                .unwrap()
                .contains(&Some(JobStatus::Running))
        );
    }
}
