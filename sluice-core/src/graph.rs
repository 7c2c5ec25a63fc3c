//! Job graph
//!
//! Jobs form a directed acyclic graph through their `needs` edges. The graph
//! is validated once, before any job run exists: duplicate names, unknown
//! dependencies or services and dependency cycles are configuration errors.

use std::collections::{HashMap, HashSet};

use crate::domain::event::Event;
use crate::domain::job::{JobDefinition, JobStatus, SkipReason};
use crate::domain::pipeline::PipelineDefinition;
use crate::domain::secrets::Secrets;
use crate::error::ConfigurationError;

/// Scheduling decision for a pending job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Some dependency has not reached a terminal status yet
    Wait,
    /// All dependencies succeeded and the trigger holds
    Start,
    /// The job will never run in this invocation
    Skip(SkipReason),
}

/// Validated job dependency graph
#[derive(Debug, Clone)]
pub struct JobGraph {
    jobs: Vec<JobDefinition>,
    index: HashMap<String, usize>,
    /// Topological order as indices into `jobs`
    order: Vec<usize>,
}

impl JobGraph {
    /// Validates jobs and computes a topological order
    ///
    /// The order is stable: among jobs whose dependencies are satisfied,
    /// declaration order wins.
    pub fn new(jobs: Vec<JobDefinition>) -> Result<Self, ConfigurationError> {
        let mut index = HashMap::new();
        for (i, job) in jobs.iter().enumerate() {
            if index.insert(job.name.clone(), i).is_some() {
                return Err(ConfigurationError::DuplicateJob(job.name.clone()));
            }
        }

        for job in &jobs {
            if job.steps.is_empty() {
                return Err(ConfigurationError::EmptyJob(job.name.clone()));
            }
            for dep in &job.needs {
                if !index.contains_key(dep) {
                    return Err(ConfigurationError::UnknownDependency {
                        job: job.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let order = topological_order(&jobs, &index)?;

        Ok(Self { jobs, index, order })
    }

    /// Builds the graph of a pipeline and checks service references
    pub fn from_pipeline(pipeline: &PipelineDefinition) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::new();
        for service in &pipeline.services {
            if !seen.insert(service.name.as_str()) {
                return Err(ConfigurationError::DuplicateService(service.name.clone()));
            }
        }

        for job in &pipeline.jobs {
            for service in &job.services {
                if !seen.contains(service.as_str()) {
                    return Err(ConfigurationError::UnknownService {
                        job: job.name.clone(),
                        service: service.clone(),
                    });
                }
            }
            for step in &job.steps {
                for service in &step.services {
                    if !job.services.contains(service) {
                        return Err(ConfigurationError::UndeclaredStepService {
                            job: job.name.clone(),
                            step: step.name.clone(),
                            service: service.clone(),
                        });
                    }
                }
            }
        }

        Self::new(pipeline.jobs.clone())
    }

    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.index.get(name).map(|&i| &self.jobs[i])
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs in topological order
    pub fn order(&self) -> impl Iterator<Item = &JobDefinition> {
        self.order.iter().map(|&i| &self.jobs[i])
    }

    /// Names of jobs that directly depend on `name`
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.order()
            .filter(|j| j.needs.iter().any(|d| d == name))
            .map(|j| j.name.as_str())
            .collect()
    }

    /// Eligibility of every job for an event, in topological order
    pub fn eligibility(&self, event: &Event) -> Vec<(&str, bool)> {
        self.order()
            .map(|j| (j.name.as_str(), j.when.evaluate(event)))
            .collect()
    }

    /// Decides what happens next to a pending job
    ///
    /// An ineligible job is skipped right away, without waiting for its
    /// dependencies. An eligible job starts only once every dependency
    /// succeeded; any other terminal dependency status skips it.
    pub fn resolve(
        &self,
        name: &str,
        statuses: &HashMap<String, JobStatus>,
        event: &Event,
    ) -> Resolution {
        let Some(job) = self.job(name) else {
            return Resolution::Wait;
        };

        if !job.when.evaluate(event) {
            return Resolution::Skip(SkipReason::NotEligible);
        }

        let mut waiting = false;
        for dep in &job.needs {
            let status = statuses.get(dep).copied().unwrap_or(JobStatus::Pending);
            match status {
                JobStatus::Succeeded => {}
                JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled => {
                    return Resolution::Skip(SkipReason::DependencyNotSucceeded {
                        dependency: dep.clone(),
                        status,
                    });
                }
                JobStatus::Pending | JobStatus::Running => waiting = true,
            }
        }

        if waiting {
            Resolution::Wait
        } else {
            Resolution::Start
        }
    }

    /// Ensures every job eligible for `event` has the secrets it needs
    pub fn check_secrets(&self, event: &Event, secrets: &Secrets) -> Result<(), ConfigurationError> {
        for job in self.order() {
            if !job.when.evaluate(event) {
                continue;
            }
            for secret in job.required_secrets() {
                if !secrets.has(secret) {
                    return Err(ConfigurationError::MissingSecret {
                        job: job.name.clone(),
                        secret,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Kahn's algorithm, picking the earliest declared ready job each round
fn topological_order(
    jobs: &[JobDefinition],
    index: &HashMap<String, usize>,
) -> Result<Vec<usize>, ConfigurationError> {
    let mut remaining: Vec<usize> = jobs.iter().map(|j| j.needs.len()).collect();
    let mut placed = vec![false; jobs.len()];
    let mut order = Vec::with_capacity(jobs.len());

    while order.len() < jobs.len() {
        let Some(next) = (0..jobs.len()).find(|&i| !placed[i] && remaining[i] == 0) else {
            return Err(ConfigurationError::Cycle(find_cycle(jobs, index, &placed)));
        };

        placed[next] = true;
        order.push(next);

        let name = &jobs[next].name;
        for (i, job) in jobs.iter().enumerate() {
            if !placed[i] {
                remaining[i] -= job.needs.iter().filter(|d| *d == name).count();
            }
        }
    }

    Ok(order)
}

/// Walks dependencies among unplaced jobs until a job repeats
fn find_cycle(jobs: &[JobDefinition], index: &HashMap<String, usize>, placed: &[bool]) -> Vec<String> {
    let Some(start) = (0..jobs.len()).find(|&i| !placed[i]) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut current = start;
    loop {
        if let Some(pos) = path.iter().position(|&i| i == current) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|&i| jobs[i].name.clone()).collect();
            cycle.push(jobs[current].name.clone());
            return cycle;
        }
        path.push(current);

        // Every unplaced job has at least one unplaced dependency
        match jobs[current]
            .needs
            .iter()
            .filter_map(|d| index.get(d).copied())
            .find(|&i| !placed[i])
        {
            Some(next) => current = next,
            None => return path.iter().map(|&i| jobs[i].name.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::StepDefinition;
    use crate::domain::secrets::{DeployKey, RegistryCredentials};
    use crate::domain::service::{BackingService, ProbeSpec};
    use crate::domain::job::{DeploySpec, PublishSpec};
    use crate::trigger::Trigger;

    fn job(name: &str) -> JobDefinition {
        JobDefinition::new(name).step(StepDefinition::run("noop", "true"))
    }

    fn two_job_chain() -> JobGraph {
        JobGraph::new(vec![
            job("build-test-lint").when(Trigger::integration("main")),
            job("deploy")
                .needs("build-test-lint")
                .when(Trigger::trunk_push("main")),
        ])
        .unwrap()
    }

    fn statuses(entries: &[(&str, JobStatus)]) -> HashMap<String, JobStatus> {
        entries
            .iter()
            .map(|(n, s)| (n.to_string(), *s))
            .collect()
    }

    #[test]
    fn test_topological_order_is_stable() {
        let graph = JobGraph::new(vec![
            job("deploy").needs("build"),
            job("lint"),
            job("build").needs("lint"),
            job("docs"),
        ])
        .unwrap();

        let order: Vec<&str> = graph.order().map(|j| j.name.as_str()).collect();
        assert_eq!(order, vec!["lint", "build", "deploy", "docs"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let result = JobGraph::new(vec![
            job("a").needs("c"),
            job("b").needs("a"),
            job("c").needs("b"),
        ]);

        match result {
            Err(ConfigurationError::Cycle(path)) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let result = JobGraph::new(vec![job("a").needs("a")]);
        assert!(matches!(result, Err(ConfigurationError::Cycle(_))));
    }

    #[test]
    fn test_unknown_dependency_and_duplicates() {
        assert!(matches!(
            JobGraph::new(vec![job("a").needs("missing")]),
            Err(ConfigurationError::UnknownDependency { .. })
        ));
        assert!(matches!(
            JobGraph::new(vec![job("a"), job("a")]),
            Err(ConfigurationError::DuplicateJob(_))
        ));
        assert!(matches!(
            JobGraph::new(vec![JobDefinition::new("empty")]),
            Err(ConfigurationError::EmptyJob(_))
        ));
    }

    #[test]
    fn test_dependency_gating() {
        let graph = two_job_chain();
        let event = Event::push("main", "r1");

        assert_eq!(
            graph.resolve("build-test-lint", &HashMap::new(), &event),
            Resolution::Start
        );
        assert_eq!(
            graph.resolve(
                "deploy",
                &statuses(&[("build-test-lint", JobStatus::Running)]),
                &event
            ),
            Resolution::Wait
        );
        assert_eq!(
            graph.resolve(
                "deploy",
                &statuses(&[("build-test-lint", JobStatus::Succeeded)]),
                &event
            ),
            Resolution::Start
        );
    }

    #[test]
    fn test_failed_dependency_skips_dependent() {
        let graph = two_job_chain();
        let event = Event::push("main", "r1");

        for status in [JobStatus::Failed, JobStatus::Skipped, JobStatus::Cancelled] {
            let resolution =
                graph.resolve("deploy", &statuses(&[("build-test-lint", status)]), &event);
            assert_eq!(
                resolution,
                Resolution::Skip(SkipReason::DependencyNotSucceeded {
                    dependency: "build-test-lint".to_string(),
                    status,
                })
            );
        }
    }

    #[test]
    fn test_deploy_never_eligible_off_trunk_or_for_merges() {
        let graph = two_job_chain();
        let done = statuses(&[("build-test-lint", JobStatus::Succeeded)]);

        for event in [
            Event::push("feature-x", "r1"),
            Event::proposed_merge("feature-x", "r1"),
            Event::proposed_merge("main", "r1"),
        ] {
            assert_eq!(
                graph.resolve("deploy", &done, &event),
                Resolution::Skip(SkipReason::NotEligible)
            );
        }
    }

    #[test]
    fn test_dependents_and_eligibility() {
        let graph = two_job_chain();
        assert_eq!(graph.dependents("build-test-lint"), vec!["deploy"]);

        let eligibility = graph.eligibility(&Event::proposed_merge("feature-x", "r1"));
        assert_eq!(eligibility, vec![("build-test-lint", true), ("deploy", false)]);
    }

    #[test]
    fn test_pipeline_service_references() {
        let pipeline = PipelineDefinition {
            name: "p".to_string(),
            description: None,
            env: HashMap::new(),
            services: vec![BackingService::new(
                "database",
                ProbeSpec::Tcp {
                    address: "localhost:5432".to_string(),
                },
            )],
            jobs: vec![job("build").service("storage")],
        };
        assert!(matches!(
            JobGraph::from_pipeline(&pipeline),
            Err(ConfigurationError::UnknownService { .. })
        ));

        let mut pipeline = pipeline;
        pipeline.jobs = vec![
            JobDefinition::new("build")
                .step(StepDefinition::run("test", "npm test").needs_service("database")),
        ];
        assert!(matches!(
            JobGraph::from_pipeline(&pipeline),
            Err(ConfigurationError::UndeclaredStepService { .. })
        ));

        pipeline.jobs[0].services.push("database".to_string());
        assert!(JobGraph::from_pipeline(&pipeline).is_ok());
    }

    #[test]
    fn test_missing_secret_only_for_eligible_jobs() {
        let graph = JobGraph::new(vec![
            job("build").when(Trigger::integration("main")),
            JobDefinition::new("deploy")
                .needs("build")
                .when(Trigger::trunk_push("main"))
                .step(StepDefinition::publish("image", PublishSpec::default()))
                .step(StepDefinition::deploy("rollout", DeploySpec::default())),
        ])
        .unwrap();

        let none = Secrets::default();
        assert!(graph
            .check_secrets(&Event::proposed_merge("feature-x", "r1"), &none)
            .is_ok());
        assert!(matches!(
            graph.check_secrets(&Event::push("main", "r1"), &none),
            Err(ConfigurationError::MissingSecret { .. })
        ));

        let all = Secrets {
            registry: Some(RegistryCredentials {
                username: "u".to_string(),
                token: "t".to_string(),
            }),
            deploy_key: Some(DeployKey::new("key")),
        };
        assert!(graph.check_secrets(&Event::push("main", "r1"), &all).is_ok());
    }
}
