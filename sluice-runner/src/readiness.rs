//! Service readiness gate
//!
//! Backing services are started outside the pipeline; the gate only
//! observes them. Each service a job declares is polled by its own task as
//! soon as the job starts, and steps wait on the services they consume.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use sluice_core::domain::service::{BackingService, ProbeSpec};

/// Upper bound on a single probe attempt
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One health check against a backing service
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<()>;
}

/// Builds the probe for a service
pub trait ProbeFactory: Send + Sync {
    fn probe(&self, spec: &ProbeSpec) -> Arc<dyn HealthProbe>;
}

/// Connects with the connection string and runs `SELECT 1`
pub struct PostgresProbe {
    url: String,
}

impl PostgresProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl HealthProbe for PostgresProbe {
    async fn check(&self) -> Result<()> {
        use sqlx::Connection;

        let mut conn = sqlx::PgConnection::connect(&self.url).await?;
        sqlx::query("SELECT 1").execute(&mut conn).await?;
        conn.close().await?;
        Ok(())
    }
}

/// GETs the URL and expects a 2xx response
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self) -> Result<()> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("health endpoint returned {}", status);
        }
        Ok(())
    }
}

/// Opens a TCP connection
pub struct TcpProbe {
    address: String,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn check(&self) -> Result<()> {
        TcpStream::connect(&self.address).await?;
        Ok(())
    }
}

pub struct StandardProbes {
    client: reqwest::Client,
}

impl StandardProbes {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for StandardProbes {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeFactory for StandardProbes {
    fn probe(&self, spec: &ProbeSpec) -> Arc<dyn HealthProbe> {
        match spec {
            ProbeSpec::Postgres { url } => Arc::new(PostgresProbe::new(url.clone())),
            ProbeSpec::Http { url } => Arc::new(HttpProbe::new(self.client.clone(), url.clone())),
            ProbeSpec::Tcp { address } => Arc::new(TcpProbe::new(address.clone())),
        }
    }
}

/// Outcome of gating one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The probe succeeded on attempt `attempts`
    Ready { attempts: u32 },
    /// Every one of `attempts` probes failed
    Unready { attempts: u32, last_error: String },
}

/// Polls a probe at a fixed interval within a retry budget
#[derive(Debug, Clone, Copy)]
pub struct ReadinessGate {
    probe_timeout: Duration,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    /// Probes until the first success, at most `max_retries` times
    ///
    /// Waits `retry_interval` between attempts, never after the last one.
    /// A probe that exceeds the probe timeout counts as a failed attempt.
    pub async fn await_ready(
        &self,
        probe: &dyn HealthProbe,
        retry_interval: Duration,
        max_retries: u32,
    ) -> Readiness {
        let mut last_error = String::from("no probe attempted");

        for attempt in 1..=max_retries {
            let result = match tokio::time::timeout(self.probe_timeout, probe.check()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "probe timed out after {:?}",
                    self.probe_timeout
                )),
            };

            match result {
                Ok(()) => return Readiness::Ready { attempts: attempt },
                Err(e) => {
                    debug!("Probe attempt {}/{} failed: {}", attempt, max_retries, e);
                    last_error = e.to_string();
                }
            }

            if attempt < max_retries {
                tokio::time::sleep(retry_interval).await;
            }
        }

        Readiness::Unready {
            attempts: max_retries,
            last_error,
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumed service did not become ready
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("service '{service}' not ready after {attempts} attempt(s): {last_error}")]
pub struct ServiceUnready {
    pub service: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Readiness of every service a job declares, polled concurrently
///
/// Polling tasks are aborted when the gates are dropped.
pub struct ServiceGates {
    gates: HashMap<String, watch::Receiver<Option<Readiness>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceGates {
    /// Spawns one polling task per service
    pub fn start(services: &[BackingService], probes: &dyn ProbeFactory, gate: ReadinessGate) -> Self {
        let mut gates = HashMap::new();
        let mut tasks = Vec::new();

        for service in services {
            let (sender, receiver) = watch::channel(None);
            let probe = probes.probe(&service.probe);
            let name = service.name.clone();
            let interval = service.retry_interval;
            let max_retries = service.max_retries;

            tasks.push(tokio::spawn(async move {
                debug!("Polling service '{}'", name);
                let readiness = gate.await_ready(probe.as_ref(), interval, max_retries).await;
                match &readiness {
                    Readiness::Ready { attempts } => {
                        info!("Service '{}' ready after {} attempt(s)", name, attempts)
                    }
                    Readiness::Unready {
                        attempts,
                        last_error,
                    } => error!(
                        "Service '{}' not ready after {} attempt(s): {}",
                        name, attempts, last_error
                    ),
                }
                let _ = sender.send(Some(readiness));
            }));

            gates.insert(service.name.clone(), receiver);
        }

        Self { gates, tasks }
    }

    pub fn empty() -> Self {
        Self {
            gates: HashMap::new(),
            tasks: Vec::new(),
        }
    }

    /// Waits until every named service resolved; fails on the first one
    /// (in the given order) that is unready
    pub async fn wait_all(&self, names: &[String]) -> Result<(), ServiceUnready> {
        for name in names {
            let Some(receiver) = self.gates.get(name) else {
                return Err(ServiceUnready {
                    service: name.clone(),
                    attempts: 0,
                    last_error: "service is not declared by the job".to_string(),
                });
            };

            let mut receiver = receiver.clone();
            let readiness = match receiver.wait_for(|r| r.is_some()).await {
                Ok(value) => value.clone(),
                Err(_) => None,
            };

            match readiness {
                Some(Readiness::Ready { .. }) => {}
                Some(Readiness::Unready {
                    attempts,
                    last_error,
                }) => {
                    return Err(ServiceUnready {
                        service: name.clone(),
                        attempts,
                        last_error,
                    });
                }
                None => {
                    return Err(ServiceUnready {
                        service: name.clone(),
                        attempts: 0,
                        last_error: "readiness polling stopped".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Drop for ServiceGates {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
