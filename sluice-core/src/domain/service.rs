//! Backing service domain types
//!
//! Backing services are started outside the pipeline. Sluice only observes
//! them through a health probe.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a backing service is probed for health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeSpec {
    /// Connect with a database connection string and run `SELECT 1`
    Postgres { url: String },
    /// GET the URL and expect a 2xx response
    Http { url: String },
    /// Open a TCP connection to `host:port`
    Tcp { address: String },
}

/// An auxiliary service a job depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackingService {
    pub name: String,
    pub probe: ProbeSpec,
    #[serde(with = "duration_secs")]
    pub retry_interval: Duration,
    /// Total number of probe attempts before giving up
    pub max_retries: u32,
}

impl BackingService {
    pub fn new(name: impl Into<String>, probe: ProbeSpec) -> Self {
        Self {
            name: name.into(),
            probe,
            retry_interval: Duration::from_secs(10),
            max_retries: 5,
        }
    }

    pub fn with_budget(mut self, retry_interval: Duration, max_retries: u32) -> Self {
        self.retry_interval = retry_interval;
        self.max_retries = max_retries;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
