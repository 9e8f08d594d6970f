//! Provisioning errors
//!
//! Every variant is fatal for the current invocation. Conditions that only
//! need time to resolve are reported as `Outcome::RetryAfter` instead.

use harvester_client::HarvesterError;
use thiserror::Error;

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The machine request itself is malformed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Provider data or platform configuration cannot be satisfied
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The schematic collaborator failed
    #[error("Schematic generation failed: {0}")]
    Schematic(String),

    /// Harvester API error that retrying will not fix
    #[error("Harvester error: {0}")]
    Harvester(#[from] HarvesterError),

    /// Failed to serialize a resource annotation
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
