//! `sluice run`: execute the pipeline on this machine
//!
//! Step output is streamed as the log buffer fills; Ctrl-C cancels the
//! invocation and waits for running jobs to wind down.

use anyhow::{Result, bail};
use colored::*;
use sluice_core::domain::job::JobStatus;
use sluice_core::domain::pipeline::PipelineReport;
use sluice_runner::config::secrets_from_env;
use sluice_runner::{CancelHandle, InMemoryLogBuffer, LogBufferService, PipelineExecutor, Runtime};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use super::load_pipeline;
use crate::config::Config;
use crate::display::{colorize_job_status, print_log_entry, print_report};
use crate::types::EventArgs;

pub async fn run_pipeline(config: &Config, args: &EventArgs) -> Result<()> {
    let runner = sluice_runner::Config::from_env()?;
    runner.validate()?;

    let pipeline = load_pipeline(&config.pipeline, &runner)?;
    let event = args.to_event(&runner.trunk_branch);
    let secrets = secrets_from_env();

    let executor = PipelineExecutor::new(pipeline, Runtime::standard(runner, secrets))?;

    let (handle, signal) = CancelHandle::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling...".yellow());
            handle.cancel();
        }
    });

    let logs = InMemoryLogBuffer::new();
    let printer = {
        let logs = logs.clone();
        tokio::spawn(async move {
            loop {
                print_entries(&logs);
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
    };

    let seen: Mutex<HashMap<String, JobStatus>> = Mutex::new(HashMap::new());
    let observer = |report: &PipelineReport| {
        let mut seen = seen.lock().unwrap_or_else(|e| e.into_inner());
        for run in &report.runs {
            if seen.insert(run.job.clone(), run.status) != Some(run.status) && run.status != JobStatus::Pending {
                println!("{} {} {}", "▸".cyan(), run.job.bold(), colorize_job_status(run.status));
            }
        }
    };

    let report = executor
        .execute(Uuid::new_v4(), event, signal, Arc::new(logs.clone()), &observer)
        .await;

    printer.abort();
    print_entries(&logs);

    println!();
    print_report(&report);

    if !report.succeeded() {
        bail!("Invocation {}", report.status);
    }
    Ok(())
}

fn print_entries(logs: &InMemoryLogBuffer) {
    for line in logs.drain() {
        print_log_entry(Some(&line.job), &line.entry);
    }
}
