//! Terminal output shared by the commands

use colored::*;
use sluice_core::domain::job::{JobRun, JobStatus};
use sluice_core::domain::log::{LogEntry, LogLevel};
use sluice_core::domain::pipeline::{InvocationStatus, PipelineReport};
use sluice_core::dto::invocation::InvocationSummary;

pub fn colorize_job_status(status: JobStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        JobStatus::Pending => label.yellow(),
        JobStatus::Running => label.cyan(),
        JobStatus::Succeeded => label.green(),
        JobStatus::Failed => label.red(),
        JobStatus::Skipped | JobStatus::Cancelled => label.dimmed(),
    }
}

pub fn colorize_invocation_status(status: InvocationStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        InvocationStatus::Running => label.cyan(),
        InvocationStatus::Succeeded => label.green(),
        InvocationStatus::Failed | InvocationStatus::Rejected => label.red(),
        InvocationStatus::Cancelled => label.dimmed(),
    }
}

/// Print a log entry, prefixed with its job when given
pub fn print_log_entry(job: Option<&str>, log: &LogEntry) {
    let level_str = format!("{:?}", log.level).to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    let prefix = job.map(|j| format!("{} ", j.bold())).unwrap_or_default();
    println!(
        "{} {}[{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        prefix,
        level_colored,
        log.message
    );
}

pub fn print_summary(summary: &InvocationSummary) {
    println!("  {} Invocation {}", "▸".cyan(), summary.id.to_string().dimmed());
    println!(
        "    Event:    {} {} @ {}",
        summary.event.kind,
        summary.event.branch,
        summary.event.short_revision()
    );
    println!("    Status:   {}", colorize_invocation_status(summary.status));
    println!(
        "    Started:  {}",
        summary
            .started_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_run(run: &JobRun) {
    let duration = run
        .duration_secs()
        .map(|s| format!(" ({}s)", s))
        .unwrap_or_default();
    println!("  {:<24} {}{}", run.job, colorize_job_status(run.status), duration.dimmed());

    if let Some(reason) = &run.skip_reason {
        println!("    {}", reason.to_string().dimmed());
    }
    if let Some(failure) = &run.failure {
        println!("    {}", failure.to_string().red());
    }
    if let Some(artifact) = &run.artifact {
        for reference in artifact.references() {
            println!("    {} {}", "published".green(), reference);
        }
    }
}

pub fn print_report(report: &PipelineReport) {
    println!("{}", "Invocation Details:".bold());
    println!("  ID:       {}", report.invocation_id.to_string().cyan());
    println!("  Pipeline: {}", report.pipeline);
    println!(
        "  Event:    {} {} @ {}",
        report.event.kind,
        report.event.branch,
        report.event.short_revision()
    );
    if let Some(target) = &report.event.target {
        println!("  Target:   {}", target);
    }
    println!("  Status:   {}", colorize_invocation_status(report.status));
    println!("  Started:  {}", report.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(ended) = report.ended_at {
        println!("  Ended:    {}", ended.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(error) = &report.error {
        println!("\n{}", "Error:".bold());
        println!("  {}", error.red());
    }

    if !report.runs.is_empty() {
        println!("\n{}", "Jobs:".bold());
        for run in &report.runs {
            print_run(run);
        }
    }
}
