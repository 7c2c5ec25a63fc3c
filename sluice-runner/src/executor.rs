//! Command executors
//!
//! `run` steps execute through a `CommandExecutor`:
//! - `LocalShell`: `sh -c` on the host, in the workspace directory
//! - `ContainerExecutor`: `podman exec` inside a per-job container with the
//!   workspace mounted at `/workspace`
//!
//! Child processes are killed when the executing future is dropped, so
//! aborting a job task (cancellation) stops its running command.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sluice_core::domain::job::JobDefinition;

use crate::shell::{CommandOutput, SECRET_VARS};

/// Runs shell commands for the steps of one job
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs `command` with exactly `env` added to the executor's environment
    async fn execute(&self, command: &str, env: &HashMap<String, String>) -> Result<CommandOutput>;
}

/// Creates the executor for a job run
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    async fn for_job(&self, run_id: Uuid, job: &JobDefinition) -> Result<Arc<dyn CommandExecutor>>;
}

/// Host shell executor
pub struct LocalShell {
    workdir: PathBuf,
}

impl LocalShell {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl CommandExecutor for LocalShell {
    async fn execute(&self, command: &str, env: &HashMap<String, String>) -> Result<CommandOutput> {
        debug!("Executing on host: {}", command);

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        // Secrets inherited from the process environment are not passed on;
        // steps that need one receive it through `env`
        for name in SECRET_VARS {
            cmd.env_remove(name);
        }

        let output = cmd
            .envs(env)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn shell for '{}'", command))?;

        Ok(CommandOutput::from_output(&output))
    }
}

/// Per-job podman container
///
/// Started detached with the workspace mounted and an idle entrypoint;
/// commands run through `podman exec`. Removed on drop.
pub struct ContainerExecutor {
    container_name: String,
}

impl ContainerExecutor {
    /// Starts the container for a job run
    pub async fn start(run_id: Uuid, image: &str, workspace: &std::path::Path) -> Result<Self> {
        let container_name = format!("sluice-{}", run_id);

        info!("Creating container {} for image {}", container_name, image);

        // Override any image entrypoint so the container idles until removed
        let output = Command::new("podman")
            .arg("run")
            .arg("-d")
            .arg("--name")
            .arg(&container_name)
            .arg("--entrypoint")
            .arg("/bin/sh")
            .arg("-v")
            .arg(format!("{}:/workspace", workspace.display()))
            .arg("-w")
            .arg("/workspace")
            .arg(image)
            .arg("-c")
            .arg("sleep infinity")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to execute podman run command. Is podman installed?")?;

        let result = CommandOutput::from_output(&output);
        if !result.success() {
            anyhow::bail!(
                "Failed to start container for image {}: exit_code={}, stderr='{}'",
                image,
                result.exit_code,
                result.stderr.trim()
            );
        }

        info!(
            "Container {} started with ID: {}",
            container_name,
            result.stdout.trim()
        );

        Ok(Self { container_name })
    }
}

#[async_trait]
impl CommandExecutor for ContainerExecutor {
    async fn execute(&self, command: &str, env: &HashMap<String, String>) -> Result<CommandOutput> {
        debug!("Executing in container {}: {}", self.container_name, command);

        let mut cmd = Command::new("podman");
        cmd.arg("exec").arg("-w").arg("/workspace");
        // `-e NAME` takes the value from podman's own environment, which
        // keeps values out of the process arguments
        for (key, value) in env {
            cmd.arg("-e").arg(key).env(key, value);
        }
        cmd.arg(&self.container_name).arg("sh").arg("-c").arg(command);

        let output = cmd
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to execute podman exec command")?;

        Ok(CommandOutput::from_output(&output))
    }
}

impl Drop for ContainerExecutor {
    fn drop(&mut self) {
        // Drop may run outside a runtime (or during its shutdown): use a
        // blocking command
        match std::process::Command::new("podman")
            .arg("rm")
            .arg("-f")
            .arg(&self.container_name)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
        {
            Ok(output) if output.status.success() => {
                debug!("Container {} removed", self.container_name);
            }
            Ok(output) => warn!(
                "Failed to remove container {}: {}",
                self.container_name,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("Failed to remove container {}: {}", self.container_name, e),
        }
    }
}

/// Host shell for jobs without a container, podman otherwise
pub struct StandardExecutors {
    workspace: PathBuf,
}

impl StandardExecutors {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl ExecutorFactory for StandardExecutors {
    async fn for_job(&self, run_id: Uuid, job: &JobDefinition) -> Result<Arc<dyn CommandExecutor>> {
        match &job.container {
            Some(image) => Ok(Arc::new(
                ContainerExecutor::start(run_id, image, &self.workspace).await?,
            )),
            None => Ok(Arc::new(LocalShell::new(self.workspace.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_shell_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let shell = LocalShell::new(dir.path().to_path_buf());

        let mut env = HashMap::new();
        env.insert("GREETING".to_string(), "hello".to_string());

        let output = shell.execute("echo $GREETING; echo oops >&2", &env).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_local_shell_passes_only_given_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let shell = LocalShell::new(dir.path().to_path_buf());

        let output = shell
            .execute("echo \"[${SSH_PRIVATE_KEY:-}]\"", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "[]");
    }

    #[tokio::test]
    async fn test_local_shell_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let shell = LocalShell::new(dir.path().to_path_buf());

        let output = shell.execute("ls", &HashMap::new()).await.unwrap();
        assert!(output.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_local_shell_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let shell = LocalShell::new(dir.path().to_path_buf());

        let output = shell.execute("exit 3", &HashMap::new()).await.unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_factory_uses_host_shell_without_container() {
        let dir = tempfile::tempdir().unwrap();
        let factory = StandardExecutors::new(dir.path().to_path_buf());
        let job = JobDefinition::new("build");

        let executor = factory.for_job(Uuid::new_v4(), &job).await.unwrap();
        let output = executor.execute("true", &HashMap::new()).await.unwrap();
        assert!(output.success());
    }
}
