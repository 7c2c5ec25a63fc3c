//! Remote deployment executor
//!
//! A deploy opens one SSH session to the deployment host, proxied through
//! the tunnel client, and runs the rollout operations over it in order:
//!
//! 1. `ensure-checkout`: clone the deployment repository if absent, fast-forward otherwise
//! 2. `pull-images`: fetch the images referenced by the new tag
//! 3. `stop-stack`: `compose down`, a no-op when nothing runs
//! 4. `start-stack`: `compose up -d` with the new tag
//!
//! Stopping before starting makes the sequence a fixed point: running it
//! twice leaves the host as running it once. A failed operation ends the
//! rollout; nothing is rolled back.
//!
//! The host stack is a singleton, so an executor serializes deploys: a
//! second rollout waits until the first one released the host.

use async_trait::async_trait;
use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use sluice_core::domain::job::DeploySpec;
use sluice_core::domain::secrets::DeployKey;

use crate::config::Config;
use crate::shell::{CommandOutput, quote, quote_path};

/// How the SSH session reaches the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelKind {
    /// Through `cloudflared access ssh`; the host is never exposed directly
    Cloudflared,
    /// Plain TCP, for hosts on a private network
    Direct,
}

impl TunnelKind {
    /// `ProxyCommand` handed to ssh, if any
    pub fn proxy_command(&self) -> Option<&'static str> {
        match self {
            TunnelKind::Cloudflared => Some("cloudflared access ssh --hostname %h"),
            TunnelKind::Direct => None,
        }
    }
}

impl std::str::FromStr for TunnelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cloudflared" | "cloudflare" => Ok(TunnelKind::Cloudflared),
            "direct" | "none" => Ok(TunnelKind::Direct),
            other => Err(format!(
                "unknown tunnel '{}', expected 'cloudflared' or 'direct'",
                other
            )),
        }
    }
}

impl std::fmt::Display for TunnelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelKind::Cloudflared => write!(f, "cloudflared"),
            TunnelKind::Direct => write!(f, "direct"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RolloutOperation {
    EnsureCheckout,
    PullImages,
    StopStack,
    StartStack,
}

impl RolloutOperation {
    pub const ALL: [RolloutOperation; 4] = [
        RolloutOperation::EnsureCheckout,
        RolloutOperation::PullImages,
        RolloutOperation::StopStack,
        RolloutOperation::StartStack,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RolloutOperation::EnsureCheckout => "ensure-checkout",
            RolloutOperation::PullImages => "pull-images",
            RolloutOperation::StopStack => "stop-stack",
            RolloutOperation::StartStack => "start-stack",
        }
    }

    /// Remote shell command for this operation
    pub fn command(&self, plan: &RolloutPlan) -> String {
        let dir = quote_path(&plan.directory);
        let branch = quote(&plan.branch);

        match self {
            RolloutOperation::EnsureCheckout => {
                let present = format!(
                    "git -C {dir} fetch origin {branch} && git -C {dir} checkout {branch} && git -C {dir} pull --ff-only origin {branch}"
                );
                let absent = match &plan.repository {
                    Some(repository) => format!(
                        "git clone --branch {branch} {} {dir}",
                        quote(repository)
                    ),
                    None => format!(
                        "echo {} >&2; exit 1",
                        quote(&format!("no checkout at {}", plan.directory))
                    ),
                };
                format!("if [ -d {dir}/.git ]; then {present}; else {absent}; fi")
            }
            RolloutOperation::PullImages => format!("cd {dir} && {} pull", plan.compose_command()),
            RolloutOperation::StopStack => format!("cd {dir} && {} down", plan.compose_command()),
            RolloutOperation::StartStack => format!("cd {dir} && {} up -d", plan.compose_command()),
        }
    }
}

impl std::str::FromStr for RolloutOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RolloutOperation::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = RolloutOperation::ALL.iter().map(|op| op.name()).collect();
                format!("unknown operation '{}', expected one of: {}", s, names.join(", "))
            })
    }
}

impl std::fmt::Display for RolloutOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where and what to roll out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutPlan {
    /// Checkout directory on the host; a leading `~/` is expanded remotely
    pub directory: String,
    /// Cloned when the checkout is absent
    pub repository: Option<String>,
    pub branch: String,
    /// Compose invocation, e.g. `docker compose`
    pub compose: String,
    pub compose_file: Option<String>,
    /// Exported as `IMAGE_TAG` to every compose command
    pub image_tag: String,
    pub operations: Vec<RolloutOperation>,
}

impl RolloutPlan {
    pub fn new(directory: impl Into<String>, branch: impl Into<String>, image_tag: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            repository: None,
            branch: branch.into(),
            compose: "docker compose".to_string(),
            compose_file: None,
            image_tag: image_tag.into(),
            operations: RolloutOperation::ALL.to_vec(),
        }
    }

    /// Plan for a deploy step; unset step fields fall back to configuration
    pub fn for_step(config: &Config, spec: &DeploySpec, image_tag: &str) -> Self {
        Self {
            directory: spec
                .directory
                .clone()
                .unwrap_or_else(|| config.deploy_directory.clone()),
            repository: spec.repository.clone().or_else(|| config.deploy_repository.clone()),
            branch: spec
                .branch
                .clone()
                .unwrap_or_else(|| config.deploy_branch().to_string()),
            compose: format!("{} compose", config.container_engine),
            compose_file: spec.compose_file.clone(),
            image_tag: image_tag.to_string(),
            operations: RolloutOperation::ALL.to_vec(),
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    /// Restricts the plan to a single operation
    pub fn only(mut self, operation: RolloutOperation) -> Self {
        self.operations = vec![operation];
        self
    }

    fn compose_command(&self) -> String {
        let mut command = format!("IMAGE_TAG={} {}", quote(&self.image_tag), self.compose);
        if let Some(file) = &self.compose_file {
            command.push_str(" -f ");
            command.push_str(&quote(file));
        }
        command
    }

    /// Operations paired with their remote commands, in execution order
    pub fn script(&self) -> Vec<(RolloutOperation, String)> {
        self.operations
            .iter()
            .map(|op| (*op, op.command(self)))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("deployment host is not configured (set SSH_HOST)")]
    NotConfigured,

    #[error("failed to prepare deploy key: {0}")]
    Key(String),

    #[error("failed to open session to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("session transport failed: {0}")]
    Transport(String),
}

/// Shell on the deployment host
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput, DeployError>;
}

/// Opens authenticated sessions to the deployment host
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, key: &DeployKey) -> Result<Box<dyn RemoteShell>, DeployError>;
}

/// Opens SSH sessions through the configured tunnel
pub struct SshConnector {
    host: Option<String>,
    user: String,
    tunnel: TunnelKind,
}

impl SshConnector {
    pub fn new(host: Option<String>, user: impl Into<String>, tunnel: TunnelKind) -> Self {
        Self {
            host,
            user: user.into(),
            tunnel,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ssh_host.clone(), config.ssh_user.clone(), config.tunnel)
    }
}

#[async_trait]
impl SessionFactory for SshConnector {
    async fn open(&self, key: &DeployKey) -> Result<Box<dyn RemoteShell>, DeployError> {
        let host = self.host.clone().ok_or(DeployError::NotConfigured)?;

        // Created with mode 0600 and removed when the session is dropped
        let mut key_file = NamedTempFile::new().map_err(|e| DeployError::Key(e.to_string()))?;
        let mut material = key.expose().to_string();
        if !material.ends_with('\n') {
            material.push('\n');
        }
        key_file
            .write_all(material.as_bytes())
            .map_err(|e| DeployError::Key(e.to_string()))?;
        key_file.flush().map_err(|e| DeployError::Key(e.to_string()))?;

        let session = SshSession {
            host: host.clone(),
            user: self.user.clone(),
            tunnel: self.tunnel,
            key_file,
        };

        debug!("Opening session to {}@{} via {}", self.user, host, self.tunnel);
        let probe = session.run("true").await?;
        if !probe.success() {
            return Err(DeployError::Connect {
                host,
                message: probe.stderr.trim().to_string(),
            });
        }

        Ok(Box::new(session))
    }
}

struct SshSession {
    host: String,
    user: String,
    tunnel: TunnelKind,
    key_file: NamedTempFile,
}

impl SshSession {
    fn args(&self, command: &str) -> Vec<String> {
        ssh_args(
            &self.key_file.path().display().to_string(),
            &self.user,
            &self.host,
            self.tunnel,
            command,
        )
    }
}

#[async_trait]
impl RemoteShell for SshSession {
    async fn run(&self, command: &str) -> Result<CommandOutput, DeployError> {
        debug!("Running on {}: {}", self.host, command);

        let output = Command::new("ssh")
            .args(self.args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DeployError::Transport(format!("failed to execute ssh: {}", e)))?;

        Ok(CommandOutput::from_output(&output))
    }
}

/// Non-interactive ssh arguments: key-only auth, connect timeout and
/// keepalives so a stalled tunnel fails instead of hanging
pub fn ssh_args(key_path: &str, user: &str, host: &str, tunnel: TunnelKind, command: &str) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        key_path.to_string(),
        "-o".to_string(),
        "IdentitiesOnly=yes".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "ConnectTimeout=10".to_string(),
        "-o".to_string(),
        "ServerAliveInterval=15".to_string(),
        "-o".to_string(),
        "ServerAliveCountMax=3".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
    ];

    if let Some(proxy) = tunnel.proxy_command() {
        args.push("-o".to_string());
        args.push(format!("ProxyCommand={}", proxy));
    }

    args.push(format!("{}@{}", user, host));
    args.push(command.to_string());
    args
}

/// One completed rollout operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReport {
    pub operation: RolloutOperation,
    pub command: String,
    pub output: CommandOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployFailure {
    /// Operation name, or `connect` when no session could be opened
    pub operation: String,
    /// Remote command that failed, for manual remediation
    pub command: Option<String>,
    pub exit_code: Option<i32>,
    pub message: String,
    /// Operations that completed before the failure
    pub completed: Vec<OperationReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployResult {
    Succeeded { operations: Vec<OperationReport> },
    Failed(DeployFailure),
}

impl DeployResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeployResult::Succeeded { .. })
    }
}

/// Runs rollout plans, one at a time per executor
pub struct DeployExecutor {
    sessions: Arc<dyn SessionFactory>,
    lock: Arc<Mutex<()>>,
}

impl DeployExecutor {
    pub fn new(sessions: Arc<dyn SessionFactory>) -> Self {
        Self {
            sessions,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Opens a session and runs every operation of the plan
    ///
    /// The host is held for the whole sequence; the session is released
    /// when this returns or when the future is dropped.
    pub async fn deploy(&self, plan: &RolloutPlan, key: &DeployKey) -> DeployResult {
        let _host = self.lock.lock().await;

        let session = match self.sessions.open(key).await {
            Ok(session) => session,
            Err(e) => {
                error!("Deploy session failed: {}", e);
                return DeployResult::Failed(DeployFailure {
                    operation: "connect".to_string(),
                    command: None,
                    exit_code: None,
                    message: e.to_string(),
                    completed: Vec::new(),
                });
            }
        };

        let mut completed = Vec::new();
        for (operation, command) in plan.script() {
            info!("Rollout operation {}", operation);

            match session.run(&command).await {
                Ok(output) if output.success() => completed.push(OperationReport {
                    operation,
                    command,
                    output,
                }),
                Ok(output) => {
                    error!(
                        "Rollout operation {} exited with code {}",
                        operation, output.exit_code
                    );
                    return DeployResult::Failed(DeployFailure {
                        operation: operation.name().to_string(),
                        command: Some(command),
                        exit_code: Some(output.exit_code),
                        message: output.stderr.trim().to_string(),
                        completed,
                    });
                }
                Err(e) => {
                    error!("Rollout operation {} failed: {}", operation, e);
                    return DeployResult::Failed(DeployFailure {
                        operation: operation.name().to_string(),
                        command: Some(command),
                        exit_code: None,
                        message: e.to_string(),
                        completed,
                    });
                }
            }
        }

        info!("Rollout of {} complete", plan.image_tag);
        DeployResult::Succeeded {
            operations: completed,
        }
    }
}
