//! Runtime services shared by every invocation
//!
//! Built once at the binary edge from configuration and secrets. Tests swap
//! individual services for in-memory fakes.

use std::sync::Arc;

use sluice_core::domain::secrets::Secrets;

use crate::config::Config;
use crate::deploy::{DeployExecutor, SessionFactory, SshConnector};
use crate::executor::{ExecutorFactory, StandardExecutors};
use crate::publish::{ArtifactPublisher, CliEngine, ContainerEngine};
use crate::readiness::{ProbeFactory, ReadinessGate, StandardProbes};

#[derive(Clone)]
pub struct Runtime {
    pub config: Arc<Config>,
    /// Read-only for the lifetime of the process
    pub secrets: Arc<Secrets>,
    pub probes: Arc<dyn ProbeFactory>,
    pub gate: ReadinessGate,
    pub executors: Arc<dyn ExecutorFactory>,
    pub publisher: Arc<ArtifactPublisher>,
    /// Shared so that deploys of concurrent invocations never overlap
    pub deployer: Arc<DeployExecutor>,
}

impl Runtime {
    /// Real probes, shell executors, container engine CLI and SSH sessions
    pub fn standard(config: Config, secrets: Secrets) -> Self {
        let engine: Arc<dyn ContainerEngine> = Arc::new(CliEngine::new(config.container_engine.clone()));
        let sessions: Arc<dyn SessionFactory> = Arc::new(SshConnector::from_config(&config));

        Self {
            probes: Arc::new(StandardProbes::new()),
            gate: ReadinessGate::new(),
            executors: Arc::new(StandardExecutors::new(config.workspace.clone())),
            publisher: Arc::new(ArtifactPublisher::new(engine)),
            deployer: Arc::new(DeployExecutor::new(sessions)),
            config: Arc::new(config),
            secrets: Arc::new(secrets),
        }
    }

    pub fn with_probes(mut self, probes: Arc<dyn ProbeFactory>) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_gate(mut self, gate: ReadinessGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_executors(mut self, executors: Arc<dyn ExecutorFactory>) -> Self {
        self.executors = executors;
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn ContainerEngine>) -> Self {
        self.publisher = Arc::new(ArtifactPublisher::new(engine));
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionFactory>) -> Self {
        self.deployer = Arc::new(DeployExecutor::new(sessions));
        self
    }
}
