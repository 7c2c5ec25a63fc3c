//! Configuration module
//!
//! Global CLI settings. Runner settings (registry, SSH host, readiness
//! budget) come from the environment through `sluice_runner::Config`.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub orchestrator_url: String,
    /// Pipeline definition used by local commands
    pub pipeline: PathBuf,
}
