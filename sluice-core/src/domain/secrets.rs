//! Process-wide secrets
//!
//! Secrets are injected once per invocation and handed to the steps that
//! declare a need for them. `Debug` output never contains secret values.

use serde::{Deserialize, Serialize};

/// Kinds of secret a step may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    RegistryCredentials,
    DeployKey,
}

impl std::fmt::Display for SecretKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretKind::RegistryCredentials => write!(f, "registry credentials"),
            SecretKind::DeployKey => write!(f, "deploy key"),
        }
    }
}

impl std::str::FromStr for SecretKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registry" | "registry_credentials" => Ok(SecretKind::RegistryCredentials),
            "deploy_key" | "ssh_key" => Ok(SecretKind::DeployKey),
            other => Err(format!("unknown secret '{}'", other)),
        }
    }
}

#[derive(Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Private key used to authenticate the deployment session
#[derive(Clone)]
pub struct DeployKey(String);

impl DeployKey {
    pub fn new(pem: impl Into<String>) -> Self {
        Self(pem.into())
    }

    /// Raw key material. Only the deploy session may read this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for DeployKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeployKey(<redacted>)")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub registry: Option<RegistryCredentials>,
    pub deploy_key: Option<DeployKey>,
}

impl Secrets {
    pub fn has(&self, kind: SecretKind) -> bool {
        match kind {
            SecretKind::RegistryCredentials => self.registry.is_some(),
            SecretKind::DeployKey => self.deploy_key.is_some(),
        }
    }
}
