//! Invocation command handlers
//!
//! Listing, details, logs and cancellation of orchestrator invocations.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use sluice_client::OrchestratorClient;

use crate::config::Config;
use crate::display::{colorize_invocation_status, print_log_entry, print_report, print_summary};
use crate::id_resolver::resolve_invocation_id;
use crate::types::IdOrPrefix;

#[derive(Subcommand)]
pub enum InvocationCommands {
    /// List all invocations
    List,
    /// Get invocation details
    Get {
        /// Invocation ID or unambiguous prefix
        id: String,

        /// Print the raw report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Get invocation logs
    Logs {
        /// Invocation ID or unambiguous prefix
        id: String,

        /// Only show logs of this job
        #[arg(long)]
        job: Option<String>,
    },
    /// Cancel a running invocation
    Cancel {
        /// Invocation ID or unambiguous prefix
        id: String,
    },
}

pub async fn handle_invocation_command(command: InvocationCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        InvocationCommands::List => list_invocations(&client).await,
        InvocationCommands::Get { id, json } => get_invocation(&client, &id, json).await,
        InvocationCommands::Logs { id, job } => get_logs(&client, &id, job.as_deref()).await,
        InvocationCommands::Cancel { id } => cancel_invocation(&client, &id).await,
    }
}

async fn list_invocations(client: &OrchestratorClient) -> Result<()> {
    let invocations = client.list_invocations().await?;

    if invocations.is_empty() {
        println!("{}", "No invocations found.".yellow());
    } else {
        println!("{}", format!("Found {} invocation(s):", invocations.len()).bold());
        println!();
        for summary in &invocations {
            print_summary(summary);
        }
    }

    Ok(())
}

async fn get_invocation(client: &OrchestratorClient, id: &str, json: bool) -> Result<()> {
    let uuid = resolve_invocation_id(client, &IdOrPrefix::parse(id)).await?;
    let report = client.get_invocation(uuid).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

async fn get_logs(client: &OrchestratorClient, id: &str, job: Option<&str>) -> Result<()> {
    let uuid = resolve_invocation_id(client, &IdOrPrefix::parse(id)).await?;
    let logs = client.get_invocation_logs(uuid).await?;

    let jobs: Vec<_> = logs
        .jobs
        .iter()
        .filter(|j| job.is_none_or(|name| j.job == name))
        .filter(|j| !j.entries.is_empty())
        .collect();

    if jobs.is_empty() {
        println!("{}", "No logs found for this invocation.".yellow());
        return Ok(());
    }

    println!("{}", format!("Logs for invocation {}:", uuid).bold());
    for job in jobs {
        println!("{}", "─".repeat(80).dimmed());
        println!("{}", job.job.bold());
        for entry in &job.entries {
            print_log_entry(None, entry);
        }
    }
    println!("{}", "─".repeat(80).dimmed());

    Ok(())
}

async fn cancel_invocation(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_invocation_id(client, &IdOrPrefix::parse(id)).await?;
    let response = client.cancel_invocation(uuid).await?;

    if response.cancelled {
        println!("{} Cancellation requested for {}", "✓".green(), uuid.to_string().cyan());
    } else {
        println!(
            "{}",
            format!(
                "Invocation {} is not running ({})",
                uuid,
                colorize_invocation_status(response.status)
            )
            .yellow()
        );
    }

    Ok(())
}
