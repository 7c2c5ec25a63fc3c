//! Local pipeline inspection: `validate` and `plan`

use anyhow::Result;
use colored::*;
use sluice_core::graph::JobGraph;

use super::load_pipeline;
use crate::config::Config;
use crate::types::EventArgs;

/// Parse the pipeline and build its job graph
pub fn validate(config: &Config) -> Result<()> {
    let runner = sluice_runner::Config::from_env()?;
    let pipeline = load_pipeline(&config.pipeline, &runner)?;
    let graph = JobGraph::from_pipeline(&pipeline)?;

    println!("{} {}", "✓".green(), format!("Pipeline '{}' is valid", pipeline.name).bold());
    if let Some(description) = &pipeline.description {
        println!("  {}", description.dimmed());
    }

    if !pipeline.services.is_empty() {
        println!("\n{}", "Services:".bold());
        for service in &pipeline.services {
            println!(
                "  {:<24} every {:?}, {} attempts",
                service.name, service.retry_interval, service.max_retries
            );
        }
    }

    println!("\n{}", "Jobs:".bold());
    for job in graph.order() {
        let needs = if job.needs.is_empty() {
            String::new()
        } else {
            format!(" (needs {})", job.needs.join(", "))
        };
        println!("  {:<24} {} step(s){}", job.name, job.steps.len(), needs.dimmed());
    }

    Ok(())
}

/// Show which jobs are eligible for an event
pub fn plan(config: &Config, args: &EventArgs) -> Result<()> {
    let runner = sluice_runner::Config::from_env()?;
    let pipeline = load_pipeline(&config.pipeline, &runner)?;
    let graph = JobGraph::from_pipeline(&pipeline)?;
    let event = args.to_event(&runner.trunk_branch);

    println!(
        "{}",
        format!(
            "Plan for {} on {} @ {}:",
            event.kind,
            event.branch,
            event.short_revision()
        )
        .bold()
    );
    for (job, eligible) in graph.eligibility(&event) {
        let marker = if eligible { "run".green() } else { "skip".dimmed() };
        println!("  {:<24} {}", job, marker);
    }

    let secrets = sluice_runner::config::secrets_from_env();
    if let Err(e) = graph.check_secrets(&event, &secrets) {
        println!("\n{} {}", "⚠".yellow(), e.to_string().yellow());
    }

    Ok(())
}
