//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod deploy;
mod event;
mod init;
mod invocation;
mod pipeline;
mod run;

pub use event::EventCommands;
pub use init::InitArgs;
pub use invocation::InvocationCommands;

use anyhow::{Context, Result};
use clap::Subcommand;
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_runner::deploy::RolloutOperation;
use std::path::Path;

use crate::config::Config;
use crate::types::EventArgs;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline locally for an event
    Run {
        #[command(flatten)]
        event: EventArgs,
    },
    /// Show which jobs an event would run
    Plan {
        #[command(flatten)]
        event: EventArgs,
    },
    /// Check the pipeline definition
    Validate,
    /// Roll out to the remote host without running the pipeline
    Deploy {
        /// Image tag to roll out
        #[arg(long, default_value = "latest")]
        tag: String,

        /// Run a single operation (ensure-checkout, pull-images, stop-stack, start-stack)
        #[arg(long)]
        operation: Option<RolloutOperation>,

        /// Print the remote commands without connecting
        #[arg(long)]
        dry_run: bool,
    },
    /// Submit events to the orchestrator
    Event {
        #[command(subcommand)]
        command: EventCommands,
    },
    /// Inspect invocations on the orchestrator
    Invocation {
        #[command(subcommand)]
        command: InvocationCommands,
    },
    /// Create a starter pipeline and Lua development files
    Init(InitArgs),
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run { event } => run::run_pipeline(config, &event).await,
        Commands::Plan { event } => pipeline::plan(config, &event),
        Commands::Validate => pipeline::validate(config),
        Commands::Deploy {
            tag,
            operation,
            dry_run,
        } => deploy::deploy(&tag, operation, dry_run).await,
        Commands::Event { command } => event::handle_event_command(command, config).await,
        Commands::Invocation { command } => {
            invocation::handle_invocation_command(command, config).await
        }
        Commands::Init(args) => init::init(&args),
    }
}

/// Reads and evaluates a pipeline file with the runner's script variables
fn load_pipeline(path: &Path, runner: &sluice_runner::Config) -> Result<PipelineDefinition> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;

    sluice_lua::parse_pipeline(&source, runner.script_vars())
        .with_context(|| format!("Invalid pipeline definition in {}", path.display()))
}
