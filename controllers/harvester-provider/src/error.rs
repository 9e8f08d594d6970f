//! Controller-specific error types.

use kube::Error as KubeError;
use kube_runtime::finalizer;
use provisioner::ProvisionError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the Harvester provider controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Provisioning pipeline failed
    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Image factory client could not be set up
    #[error("Schematic client error: {0}")]
    Schematic(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Machine not deleted yet; keep the finalizer and retry
    #[error("Deprovisioning pending, retrying in {0:?}")]
    DeprovisionPending(Duration),

    /// Metrics registry or server error
    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl From<finalizer::Error<ControllerError>> for ControllerError {
    fn from(err: finalizer::Error<ControllerError>) -> Self {
        match err {
            finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => e,
            finalizer::Error::AddFinalizer(e) | finalizer::Error::RemoveFinalizer(e) => Self::Kube(e),
            other => Self::InvalidConfig(other.to_string()),
        }
    }
}

impl From<prometheus::Error> for ControllerError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}
