//! Artifact publisher
//!
//! Logs in to the registry, builds the image once with every requested
//! tag and pushes each tag. Nothing is retried: the first failure is
//! returned to the stage runner.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use sluice_core::domain::artifact::{Artifact, is_valid_tag};
use sluice_core::domain::secrets::RegistryCredentials;

use crate::shell::CommandOutput;

/// Container engine operations needed to publish an image
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn login(&self, registry: &str, credentials: &RegistryCredentials) -> Result<()>;

    /// Builds `context` once, tagging the result with every reference
    async fn build(&self, context: &Path, dockerfile: Option<&Path>, references: &[String]) -> Result<()>;

    async fn push(&self, reference: &str) -> Result<()>;
}

/// `docker` or `podman` command line
pub struct CliEngine {
    binary: String,
}

impl CliEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, command: &mut Command, what: &str) -> Result<CommandOutput> {
        let output = command
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute {} {}. Is it installed?", self.binary, what))?;

        let result = CommandOutput::from_output(&output);
        if !result.success() {
            anyhow::bail!(
                "{} {} exited with code {}: {}",
                self.binary,
                what,
                result.exit_code,
                result.stderr.trim()
            );
        }
        Ok(result)
    }
}

#[async_trait]
impl ContainerEngine for CliEngine {
    async fn login(&self, registry: &str, credentials: &RegistryCredentials) -> Result<()> {
        // The token goes through stdin, never through the arguments
        let mut child = Command::new(&self.binary)
            .arg("login")
            .arg(registry)
            .arg("--username")
            .arg(&credentials.username)
            .arg("--password-stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to execute {} login. Is it installed?", self.binary))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(credentials.token.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let result = CommandOutput::from_output(&output);
        if !result.success() {
            anyhow::bail!(
                "{} login exited with code {}: {}",
                self.binary,
                result.exit_code,
                result.stderr.trim()
            );
        }
        Ok(())
    }

    async fn build(&self, context: &Path, dockerfile: Option<&Path>, references: &[String]) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("build");
        for reference in references {
            cmd.arg("-t").arg(reference);
        }
        if let Some(dockerfile) = dockerfile {
            cmd.arg("-f").arg(dockerfile);
        }
        cmd.arg(context);

        self.run(&mut cmd, "build").await?;
        Ok(())
    }

    async fn push(&self, reference: &str) -> Result<()> {
        self.run(Command::new(&self.binary).arg("push").arg(reference), "push")
            .await?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid image tag '{0}'")]
    InvalidTag(String),

    #[error("registry authentication to {registry} failed: {message}")]
    Auth { registry: String, message: String },

    #[error("image build failed: {0}")]
    Build(String),

    #[error("push of {reference} failed: {message}")]
    Push { reference: String, message: String },
}

/// What to build and where to push it
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub context: PathBuf,
    pub dockerfile: Option<PathBuf>,
    /// Repository without tag, e.g. `ghcr.io/acme/app`
    pub repository: String,
    pub tags: Vec<String>,
}

impl PublishRequest {
    /// Tags for one run: the floating alias, the revision id, then extras,
    /// without duplicates
    pub fn tag_set(alias: &str, revision: &str, extra: &[String]) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for tag in [alias, revision].into_iter().chain(extra.iter().map(String::as_str)) {
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
        tags
    }
}

/// Registry host a repository lives on
///
/// The first path component names a registry when it looks like a host
/// (contains `.` or `:`, or is `localhost`); otherwise it is Docker Hub.
pub fn registry_host(repository: &str) -> &str {
    match repository.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first
        }
        _ => "docker.io",
    }
}

pub struct ArtifactPublisher {
    engine: Arc<dyn ContainerEngine>,
}

impl ArtifactPublisher {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Authenticates, builds once and pushes every tag
    pub async fn publish(
        &self,
        request: &PublishRequest,
        credentials: &RegistryCredentials,
    ) -> Result<Artifact, PublishError> {
        if let Some(tag) = request.tags.iter().find(|t| !is_valid_tag(t)) {
            return Err(PublishError::InvalidTag(tag.clone()));
        }
        if request.tags.is_empty() {
            return Err(PublishError::InvalidTag(String::new()));
        }

        let artifact = Artifact {
            repository: request.repository.clone(),
            tags: request.tags.clone(),
        };
        let references = artifact.references();

        let registry = registry_host(&request.repository);
        debug!("Logging in to {} as {}", registry, credentials.username);
        self.engine
            .login(registry, credentials)
            .await
            .map_err(|e| PublishError::Auth {
                registry: registry.to_string(),
                message: e.to_string(),
            })?;

        info!("Building {} from {}", request.repository, request.context.display());
        self.engine
            .build(&request.context, request.dockerfile.as_deref(), &references)
            .await
            .map_err(|e| PublishError::Build(e.to_string()))?;

        for reference in &references {
            info!("Pushing {}", reference);
            self.engine
                .push(reference)
                .await
                .map_err(|e| PublishError::Push {
                    reference: reference.clone(),
                    message: e.to_string(),
                })?;
        }

        Ok(artifact)
    }
}
