//! ID resolver module
//!
//! Resolves invocation ID prefixes to full UUIDs by querying the
//! orchestrator, so users can type short, unambiguous prefixes.

use anyhow::{Context, Result, anyhow};
use sluice_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve an invocation ID or prefix to a full UUID
///
/// # Errors
/// Returns an error if no invocation or more than one invocation matches,
/// or if listing invocations fails.
pub async fn resolve_invocation_id(client: &OrchestratorClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let invocations = client
        .list_invocations()
        .await
        .context("Failed to fetch invocations for ID resolution")?;

    match_prefix(invocations.iter().map(|i| i.id), &id_or_prefix.to_string())
}

fn match_prefix(ids: impl Iterator<Item = Uuid>, prefix: &str) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No invocation found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple invocations: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
