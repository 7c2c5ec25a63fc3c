//! Event command handlers

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use sluice_client::OrchestratorClient;

use crate::config::Config;
use crate::types::EventArgs;

#[derive(Subcommand)]
pub enum EventCommands {
    /// Submit an event and start an invocation
    Submit {
        #[command(flatten)]
        event: EventArgs,
    },
}

pub async fn handle_event_command(command: EventCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        EventCommands::Submit { event } => submit_event(&client, &event).await,
    }
}

async fn submit_event(client: &OrchestratorClient, args: &EventArgs) -> Result<()> {
    let branch = args
        .branch
        .as_deref()
        .context("--branch is required when submitting an event")?;
    let event = args.to_event(branch);

    let accepted = client
        .submit_event(event.into())
        .await
        .context("Failed to submit event")?;

    println!(
        "{} Invocation {} started",
        "✓".green(),
        accepted.invocation_id.to_string().cyan()
    );
    if let Some(previous) = accepted.superseded {
        println!("  Superseded {}", previous.to_string().dimmed());
    }

    Ok(())
}
