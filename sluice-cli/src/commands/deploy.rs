//! `sluice deploy`: run the rollout on the remote host by itself

use anyhow::{Context, Result, bail};
use colored::*;
use sluice_core::domain::job::DeploySpec;
use sluice_runner::config::secrets_from_env;
use sluice_runner::deploy::{DeployExecutor, DeployResult, RolloutOperation, RolloutPlan, SshConnector};
use std::sync::Arc;

pub async fn deploy(tag: &str, operation: Option<RolloutOperation>, dry_run: bool) -> Result<()> {
    let config = sluice_runner::Config::from_env()?;
    config.validate()?;

    let mut plan = RolloutPlan::for_step(&config, &DeploySpec::default(), tag);
    if let Some(operation) = operation {
        plan = plan.only(operation);
    }

    if dry_run {
        for (operation, command) in plan.script() {
            println!("{}", format!("# {}", operation).dimmed());
            println!("{}", command);
        }
        return Ok(());
    }

    let key = secrets_from_env()
        .deploy_key
        .context("SSH_PRIVATE_KEY is required to deploy")?;

    let host = config.ssh_host.clone().unwrap_or_default();
    println!(
        "{}",
        format!("Rolling out {} to {} ({})", tag, host, config.tunnel).bold()
    );

    let executor = DeployExecutor::new(Arc::new(SshConnector::from_config(&config)));
    match executor.deploy(&plan, &key).await {
        DeployResult::Succeeded { operations } => {
            for report in operations {
                println!("  {} {}", "✓".green(), report.operation);
                for line in report.output.stdout.lines().filter(|l| !l.trim().is_empty()) {
                    println!("    {}", line.dimmed());
                }
            }
            println!("{}", "✓ Rollout complete".green().bold());
            Ok(())
        }
        DeployResult::Failed(failure) => {
            for report in &failure.completed {
                println!("  {} {}", "✓".green(), report.operation);
            }
            println!("  {} {}", "✗".red(), failure.operation);
            if let Some(code) = failure.exit_code {
                println!("    Exit Code: {}", code);
            }
            if let Some(command) = &failure.command {
                println!("    Command:   {}", command.dimmed());
            }
            bail!("Rollout failed at {}: {}", failure.operation, failure.message)
        }
    }
}
