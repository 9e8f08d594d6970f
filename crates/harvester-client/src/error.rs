//! Harvester client errors

use thiserror::Error;

/// Errors that can occur when talking to the Harvester API
#[derive(Debug, Error)]
pub enum HarvesterError {
    /// Kubernetes API error that is neither not-found nor a conflict
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),

    /// Harvester API rejected the request
    #[error("Harvester API error: {0}")]
    Api(String),

    /// Harvester API could not serve the request right now
    #[error("Harvester API unavailable: {0}")]
    Unavailable(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Watch could not be established or broke mid-stream
    #[error("Watch failed: {0}")]
    Watch(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HarvesterError {
    /// Classifies a kube error, naming the resource it concerned.
    pub fn from_kube(err: kube::Error, resource: &str) -> Self {
        match &err {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound(resource.to_string()),
            kube::Error::Api(response) if response.code == 409 => {
                Self::AlreadyExists(resource.to_string())
            }
            _ => Self::Kube(err),
        }
    }

    /// Whether retrying the same request later may succeed.
    ///
    /// Transport failures, throttling (429) and server errors (5xx) are
    /// transient; any other API response is a rejection of the request.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(response)) => response.code == 429 || response.code >= 500,
            Self::Kube(_) | Self::Unavailable(_) | Self::Watch(_) => true,
            Self::Api(_) | Self::NotFound(_) | Self::AlreadyExists(_) | Self::Serialization(_) => false,
        }
    }

    /// The object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// A create collided with an existing object.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}
