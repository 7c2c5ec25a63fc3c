//! Pipeline parser
//!
//! Evaluates a pipeline script in the sandbox and converts the returned table
//! into a `PipelineDefinition`. Only structure is checked here; graph-level
//! validation (unknown dependencies, cycles, service references) belongs to
//! `sluice_core::JobGraph`.

use anyhow::{Context, Result, anyhow, bail};
use mlua::{Table, Value};
use std::collections::HashMap;
use std::time::Duration;

use sluice_core::Trigger;
use sluice_core::domain::event::EventKind;
use sluice_core::domain::job::{DeploySpec, JobDefinition, PublishSpec, StepAction, StepDefinition};
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::secrets::SecretKind;
use sluice_core::domain::service::{BackingService, ProbeSpec};

use crate::modules::VarProvider;
use crate::sandbox::create_sandbox;

const DEFAULT_RETRY_INTERVAL_SECS: f64 = 10.0;
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Parse a pipeline definition from Lua source
///
/// `vars` are exposed read-only to the script through `env`.
///
/// # Example
/// ```no_run
/// use std::collections::HashMap;
/// use sluice_lua::parser::parse_pipeline;
///
/// let source = r#"
///     return pipeline.define {
///         name = "app",
///         jobs = {
///             pipeline.job {
///                 name = "build",
///                 when = when.integration("main"),
///                 steps = { pipeline.run { name = "test", command = "npm test" } },
///             },
///         },
///     }
/// "#;
///
/// let definition = parse_pipeline(source, HashMap::<String, String>::new())?;
/// assert_eq!(definition.jobs.len(), 1);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_pipeline<V: VarProvider + 'static>(source: &str, vars: V) -> Result<PipelineDefinition> {
    let budget = RetryBudget::from_vars(&vars)?;
    let lua = create_sandbox(vars).context("Failed to create pipeline sandbox")?;

    let pipeline: Table = lua
        .load(source)
        .set_name("=pipeline")
        .eval()
        .context("Failed to evaluate pipeline definition")?;

    let name: String = pipeline
        .get("name")
        .context("Pipeline must have a 'name' field")?;

    let description: Option<String> = pipeline
        .get("description")
        .context("Field 'description' must be a string")?;

    let env = parse_string_map(&pipeline, "env")?;
    let services = parse_services(&pipeline, &budget)?;
    let jobs = parse_jobs(&pipeline)?;

    Ok(PipelineDefinition {
        name,
        description,
        env,
        services,
        jobs,
    })
}

/// Parse an optional array of strings
fn parse_string_list(table: &Table, field: &str) -> Result<Vec<String>> {
    match table.get::<Value>(field)? {
        Value::Nil => Ok(Vec::new()),
        Value::Table(list) => list
            .sequence_values::<String>()
            .map(|v| v.with_context(|| format!("Field '{}' must contain only strings", field)))
            .collect(),
        _ => bail!("Field '{}' must be an array of strings", field),
    }
}

/// Parse an optional `table<string, string>`
fn parse_string_map(table: &Table, field: &str) -> Result<HashMap<String, String>> {
    match table.get::<Value>(field)? {
        Value::Nil => Ok(HashMap::new()),
        Value::Table(map) => {
            let mut out = HashMap::new();
            for pair in map.pairs::<String, Value>() {
                let (key, value) =
                    pair.with_context(|| format!("Field '{}' must have string keys", field))?;
                let value = match value {
                    Value::String(s) => s.to_string_lossy(),
                    Value::Integer(i) => i.to_string(),
                    Value::Number(n) => n.to_string(),
                    Value::Boolean(b) => b.to_string(),
                    _ => bail!("Variable '{}' in '{}' must be a string", key, field),
                };
                out.insert(key, value);
            }
            Ok(out)
        }
        _ => bail!("Field '{}' must be a table of strings", field),
    }
}

/// Readiness defaults for services that omit `interval` or `retries`
///
/// Taken from READINESS_INTERVAL and READINESS_RETRIES when the caller
/// provides them.
struct RetryBudget {
    interval: f64,
    retries: u32,
}

impl RetryBudget {
    fn from_vars(vars: &impl VarProvider) -> Result<Self> {
        let interval = match vars.get("READINESS_INTERVAL") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| anyhow!("READINESS_INTERVAL must be a number of seconds, got '{}'", raw))?,
            None => DEFAULT_RETRY_INTERVAL_SECS,
        };
        let retries = match vars.get("READINESS_RETRIES") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| anyhow!("READINESS_RETRIES must be a positive integer, got '{}'", raw))?,
            None => DEFAULT_MAX_RETRIES,
        };
        if retries == 0 {
            bail!("READINESS_RETRIES must be at least 1");
        }
        interval_duration(interval).context("READINESS_INTERVAL out of range")?;
        Ok(Self { interval, retries })
    }
}

fn interval_duration(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| anyhow!("{} is not a usable number of seconds", secs))
}

fn parse_services(pipeline: &Table, budget: &RetryBudget) -> Result<Vec<BackingService>> {
    let services = match pipeline.get::<Value>("services")? {
        Value::Nil => return Ok(Vec::new()),
        Value::Table(t) => t,
        _ => bail!("Field 'services' must be an array of services"),
    };

    let mut out = Vec::new();
    for entry in services.sequence_values::<Table>() {
        let service = entry.context("Failed to read service entry")?;
        out.push(parse_service(&service, budget)?);
    }
    Ok(out)
}

fn parse_service(service: &Table, budget: &RetryBudget) -> Result<BackingService> {
    let name: String = service
        .get("name")
        .context("Service must have a 'name' field")?;

    let probe: Option<String> = service.get("probe")?;
    let probe = match probe.as_deref() {
        Some("postgres") => ProbeSpec::Postgres {
            url: service
                .get("url")
                .with_context(|| format!("Service '{}' must have a 'url' field", name))?,
        },
        Some("http") => ProbeSpec::Http {
            url: service
                .get("url")
                .with_context(|| format!("Service '{}' must have a 'url' field", name))?,
        },
        Some("tcp") => ProbeSpec::Tcp {
            address: service
                .get("address")
                .with_context(|| format!("Service '{}' must have an 'address' field", name))?,
        },
        Some(other) => bail!("Service '{}' has unknown probe '{}'", name, other),
        None => bail!("Service '{}' must declare a probe (postgres, http or tcp)", name),
    };

    let interval: f64 = service
        .get::<Option<f64>>("interval")?
        .unwrap_or(budget.interval);
    let interval = interval_duration(interval)
        .with_context(|| format!("Service '{}' has an invalid interval", name))?;

    let retries: u32 = service
        .get::<Option<u32>>("retries")
        .with_context(|| format!("Service '{}': 'retries' must be a positive integer", name))?
        .unwrap_or(budget.retries);
    if retries == 0 {
        bail!("Service '{}' must allow at least one probe attempt", name);
    }

    Ok(BackingService::new(name, probe).with_budget(interval, retries))
}

fn parse_jobs(pipeline: &Table) -> Result<Vec<JobDefinition>> {
    let jobs: Table = pipeline
        .get("jobs")
        .context("Pipeline must have a 'jobs' field")?;

    let mut out = Vec::new();
    for entry in jobs.sequence_values::<Table>() {
        let job = entry.context("Failed to read job entry")?;
        out.push(parse_job(&job)?);
    }

    if out.is_empty() {
        bail!("Pipeline must have at least one job");
    }

    Ok(out)
}

fn parse_job(job: &Table) -> Result<JobDefinition> {
    let name: String = job.get("name").context("Job must have a 'name' field")?;

    let when = match job.get::<Value>("when")? {
        Value::Nil => Trigger::Always,
        value => parse_trigger(value).with_context(|| format!("Job '{}': invalid 'when'", name))?,
    };

    let container: Option<String> = job
        .get("container")
        .with_context(|| format!("Job '{}': 'container' must be a string", name))?;

    let steps_table: Table = job
        .get("steps")
        .with_context(|| format!("Job '{}' must have a 'steps' field", name))?;

    let mut steps = Vec::new();
    for entry in steps_table.sequence_values::<Table>() {
        let step = entry.with_context(|| format!("Job '{}': failed to read step", name))?;
        steps.push(parse_step(&step).with_context(|| format!("Job '{}'", name))?);
    }

    Ok(JobDefinition {
        needs: parse_string_list(job, "needs")?,
        when,
        services: parse_string_list(job, "services")?,
        container,
        env: parse_string_map(job, "env")?,
        steps,
        name,
    })
}

fn parse_step(step: &Table) -> Result<StepDefinition> {
    let name: String = step.get("name").context("Step must have a 'name' field")?;

    let kind: Option<String> = step.get("type")?;
    let command: Option<String> = step.get("command")?;

    let action = match (kind.as_deref(), command) {
        (Some("run") | None, Some(command)) => StepAction::Run { command },
        (Some("run") | None, None) => bail!("Step '{}' must have a 'command' field", name),
        (Some("publish"), _) => StepAction::Publish(parse_publish(step)?),
        (Some("deploy"), _) => StepAction::Deploy(parse_deploy(step)?),
        (Some(other), _) => bail!("Step '{}' has unknown type '{}'", name, other),
    };

    let secrets = parse_string_list(step, "secrets")?
        .iter()
        .map(|s| s.parse::<SecretKind>().map_err(|e| anyhow!("Step '{}': {}", name, e)))
        .collect::<Result<Vec<_>>>()?;

    Ok(StepDefinition {
        action,
        env: parse_string_map(step, "env")?,
        services: parse_string_list(step, "services")?,
        secrets,
        name,
    })
}

fn parse_publish(step: &Table) -> Result<PublishSpec> {
    let defaults = PublishSpec::default();
    Ok(PublishSpec {
        context: step.get::<Option<String>>("context")?.unwrap_or(defaults.context),
        dockerfile: step.get("dockerfile")?,
        image: step.get("image")?,
        alias: step.get::<Option<String>>("alias")?.unwrap_or(defaults.alias),
        extra_tags: parse_string_list(step, "tags")?,
    })
}

fn parse_deploy(step: &Table) -> Result<DeploySpec> {
    Ok(DeploySpec {
        directory: step.get("directory")?,
        repository: step.get("repository")?,
        branch: step.get("branch")?,
        compose_file: step.get("compose_file")?,
        tag: step.get("tag")?,
    })
}

/// Convert a trigger table (see the `when` module) or shorthand string
fn parse_trigger(value: Value) -> Result<Trigger> {
    let table = match value {
        Value::String(s) => {
            return match s.to_string_lossy().as_str() {
                "always" => Ok(Trigger::Always),
                "never" => Ok(Trigger::Never),
                "push" => Ok(Trigger::push()),
                "proposed_merge" => Ok(Trigger::proposed_merge()),
                other => bail!("unknown trigger '{}'", other),
            };
        }
        Value::Boolean(true) => return Ok(Trigger::Always),
        Value::Boolean(false) => return Ok(Trigger::Never),
        Value::Table(t) => t,
        _ => bail!("trigger must be a table built with the 'when' module"),
    };

    let kind: String = table.get("type").context("trigger must have a 'type' field")?;
    let trigger = match kind.as_str() {
        "always" => Trigger::Always,
        "never" => Trigger::Never,
        "kind" => {
            let value: String = table.get("value").context("kind trigger needs a value")?;
            let kind: EventKind = value.parse().map_err(|e: String| anyhow!(e))?;
            Trigger::Kind(kind)
        }
        "branch" => Trigger::Branch(table.get("value").context("branch trigger needs a value")?),
        "target" => Trigger::Target(table.get("value").context("target trigger needs a value")?),
        "all" | "any" => {
            let parts: Table = table
                .get("value")
                .with_context(|| format!("'{}' trigger needs a list", kind))?;
            let parts = parts
                .sequence_values::<Value>()
                .map(|v| parse_trigger(v?))
                .collect::<Result<Vec<_>>>()?;
            if kind == "all" {
                Trigger::All(parts)
            } else {
                Trigger::Any(parts)
            }
        }
        "not" => Trigger::Not(Box::new(parse_trigger(table.get("value")?)?)),
        other => bail!("unknown trigger type '{}'", other),
    };
    Ok(trigger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::domain::event::Event;

    fn parse(source: &str) -> Result<PipelineDefinition> {
        parse_pipeline(source, HashMap::<String, String>::new())
    }

    const FULL: &str = r#"
        local trunk = env.get("TRUNK_BRANCH", "main")

        return pipeline.define {
            name = "app",
            description = "Build, test and deploy",
            env = { RUNTIME_MODE = "test", VERSION = "dev" },
            services = {
                pipeline.postgres { name = "database", url = "postgres://localhost/app", interval = 0.5, retries = 3 },
                pipeline.http { name = "storage", url = "http://localhost:9000/minio/health/live" },
            },
            jobs = {
                pipeline.job {
                    name = "build-test-lint",
                    when = when.integration(trunk),
                    services = { "database", "storage" },
                    container = "node:20",
                    steps = {
                        pipeline.run { name = "install", command = "npm ci" },
                        pipeline.run { name = "test", command = "npm test", services = { "database", "storage" } },
                        { name = "lint", command = "npm run lint" },
                    },
                },
                pipeline.job {
                    name = "deploy",
                    needs = { "build-test-lint" },
                    when = when.trunk_push(trunk),
                    steps = {
                        pipeline.publish { name = "image", tags = { "stable" } },
                        pipeline.deploy { name = "rollout", directory = "~/app" },
                    },
                },
            },
        }
    "#;

    #[test]
    fn test_parse_full_pipeline() {
        let definition = parse(FULL).unwrap();

        assert_eq!(definition.name, "app");
        assert_eq!(definition.env["RUNTIME_MODE"], "test");
        assert_eq!(definition.services.len(), 2);
        assert_eq!(definition.services[0].max_retries, 3);
        assert_eq!(definition.services[0].retry_interval, Duration::from_millis(500));
        assert_eq!(definition.services[1].max_retries, DEFAULT_MAX_RETRIES);

        let build = &definition.jobs[0];
        assert_eq!(build.container.as_deref(), Some("node:20"));
        assert_eq!(build.steps.len(), 3);
        assert_eq!(build.steps[1].services, vec!["database", "storage"]);
        assert!(matches!(build.steps[2].action, StepAction::Run { .. }));

        let deploy = &definition.jobs[1];
        assert_eq!(deploy.needs, vec!["build-test-lint"]);
        match &deploy.steps[0].action {
            StepAction::Publish(spec) => {
                assert_eq!(spec.alias, "latest");
                assert_eq!(spec.extra_tags, vec!["stable"]);
            }
            other => panic!("expected publish, got {:?}", other),
        }
        match &deploy.steps[1].action {
            StepAction::Deploy(spec) => assert_eq!(spec.directory.as_deref(), Some("~/app")),
            other => panic!("expected deploy, got {:?}", other),
        }
    }

    #[test]
    fn test_parsed_triggers_evaluate() {
        let definition = parse(FULL).unwrap();
        let build = &definition.jobs[0].when;
        let deploy = &definition.jobs[1].when;

        assert_eq!(*build, Trigger::integration("main"));
        assert_eq!(*deploy, Trigger::trunk_push("main"));
        assert!(!deploy.evaluate(&Event::proposed_merge("feature-x", "r1")));
        assert!(build.evaluate(&Event::proposed_merge("feature-x", "r1")));
    }

    #[test]
    fn test_env_visible_to_script() {
        let mut vars = HashMap::new();
        vars.insert("TRUNK_BRANCH".to_string(), "trunk".to_string());
        let definition = parse_pipeline(FULL, vars).unwrap();
        assert_eq!(definition.jobs[1].when, Trigger::trunk_push("trunk"));
    }

    #[test]
    fn test_default_trigger_and_not() {
        let definition = parse(
            r#"
            return {
                name = "p",
                jobs = {
                    { name = "a", steps = { { name = "s", command = "true" } } },
                    { name = "b", when = when.not_(when.push()), steps = { { name = "s", command = "true" } } },
                },
            }
        "#,
        )
        .unwrap();
        assert_eq!(definition.jobs[0].when, Trigger::Always);
        assert_eq!(definition.jobs[1].when, Trigger::push().not());
    }

    #[test]
    fn test_parse_missing_name() {
        let result = parse(r#"return { jobs = {} }"#);
        assert!(result.unwrap_err().to_string().contains("name"));
    }

    #[test]
    fn test_parse_empty_jobs() {
        let result = parse(r#"return { name = "p", jobs = {} }"#);
        assert!(result.unwrap_err().to_string().contains("at least one job"));
    }

    #[test]
    fn test_run_step_requires_command() {
        let result = parse(
            r#"return { name = "p", jobs = { { name = "a", steps = { pipeline.run { name = "s" } } } } }"#,
        );
        assert!(format!("{:#}", result.unwrap_err()).contains("command"));
    }

    #[test]
    fn test_service_requires_probe_and_attempts() {
        let result = parse(
            r#"return { name = "p", services = { { name = "db" } }, jobs = { { name = "a", steps = { { name = "s", command = "true" } } } } }"#,
        );
        assert!(result.unwrap_err().to_string().contains("probe"));

        let result = parse(
            r#"return { name = "p", services = { pipeline.tcp { name = "db", address = "localhost:5432", retries = 0 } }, jobs = { { name = "a", steps = { { name = "s", command = "true" } } } } }"#,
        );
        assert!(result.unwrap_err().to_string().contains("at least one"));
    }

    const TCP_SERVICE: &str = r#"return { name = "p", services = { pipeline.tcp { name = "db", address = "localhost:5432" } }, jobs = { { name = "a", steps = { { name = "s", command = "true" } } } } }"#;

    #[test]
    fn test_readiness_defaults_come_from_vars() {
        let mut vars = HashMap::new();
        vars.insert("READINESS_INTERVAL".to_string(), "0.5".to_string());
        vars.insert("READINESS_RETRIES".to_string(), "3".to_string());

        let definition = parse_pipeline(TCP_SERVICE, vars).unwrap();
        assert_eq!(definition.services[0].retry_interval, Duration::from_millis(500));
        assert_eq!(definition.services[0].max_retries, 3);

        let definition = parse(TCP_SERVICE).unwrap();
        assert_eq!(
            definition.services[0].retry_interval,
            Duration::from_secs_f64(DEFAULT_RETRY_INTERVAL_SECS)
        );
        assert_eq!(definition.services[0].max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_invalid_readiness_vars_rejected() {
        for (name, value) in [
            ("READINESS_INTERVAL", "soon"),
            ("READINESS_INTERVAL", "1e20"),
            ("READINESS_RETRIES", "0"),
        ] {
            let mut vars = HashMap::new();
            vars.insert(name.to_string(), value.to_string());
            assert!(parse_pipeline(TCP_SERVICE, vars).is_err(), "{}={}", name, value);
        }
    }

    #[test]
    fn test_out_of_range_interval_rejected() {
        for interval in ["1e20", "-1", "0/0"] {
            let source = format!(
                r#"return {{ name = "p", services = {{ pipeline.tcp {{ name = "db", address = "localhost:5432", interval = {} }} }}, jobs = {{ {{ name = "a", steps = {{ {{ name = "s", command = "true" }} }} }} }} }}"#,
                interval
            );
            let err = parse(&source).unwrap_err();
            assert!(err.to_string().contains("invalid interval"), "{}", interval);
        }
    }

    #[test]
    fn test_unknown_secret_rejected() {
        let result = parse(
            r#"return { name = "p", jobs = { { name = "a", steps = { { name = "s", command = "true", secrets = { "aws" } } } } } }"#,
        );
        assert!(format!("{:#}", result.unwrap_err()).contains("unknown secret"));
    }

    #[test]
    fn test_parse_invalid_lua() {
        assert!(parse("this is not valid lua!!!").is_err());
        assert!(parse(r#"return "not a table""#).is_err());
    }
}
