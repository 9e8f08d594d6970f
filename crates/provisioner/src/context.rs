//! Per-request provisioning context
//!
//! Everything a pipeline run reads and writes for one machine request. The
//! context is built fresh for every invocation from the request and the
//! persisted `MachineState`; after the run the caller persists the state
//! again. Nothing request-specific is kept on the `Provisioner` itself, so
//! one provisioner serves any number of concurrent requests.

use crate::error::ProvisionError;
use async_trait::async_trait;
use crds::{MachineState, ProviderData};

/// Boot customization requested from the schematic generator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchematicRequest {
    /// Extra kernel arguments, request arguments first
    pub kernel_args: Vec<String>,
    /// Official system extensions to include
    pub extensions: Vec<String>,
}

/// Produces schematic ids for boot customizations.
///
/// Implemented by the runtime (the Talos image factory in production).
#[async_trait]
pub trait SchematicGenerator: Send + Sync {
    /// Registers the customization and returns its schematic id.
    async fn generate_schematic(&self, request: &SchematicRequest) -> Result<String, ProvisionError>;
}

/// State of one machine request during a pipeline run.
#[derive(Debug, Clone)]
pub struct ProvisionContext {
    request_id: String,
    talos_version: String,
    kernel_args: Vec<String>,
    extensions: Vec<String>,
    provider_data: ProviderData,
    state: MachineState,
    machine_uuid: Option<String>,
}

impl ProvisionContext {
    /// Context for a request that has no persisted state yet.
    pub fn new(
        request_id: impl Into<String>,
        talos_version: impl Into<String>,
        provider_data: ProviderData,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            talos_version: talos_version.into(),
            kernel_args: Vec::new(),
            extensions: Vec::new(),
            provider_data,
            state: MachineState::default(),
            machine_uuid: None,
        }
    }

    /// Restores state persisted by a previous invocation.
    pub fn with_state(mut self, state: MachineState) -> Self {
        self.state = state;
        self
    }

    /// Kernel arguments the request asks for.
    pub fn with_kernel_args(mut self, kernel_args: Vec<String>) -> Self {
        self.kernel_args = kernel_args;
        self
    }

    /// System extensions the request asks for.
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Machine request id; also the VM name.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn talos_version(&self) -> &str {
        &self.talos_version
    }

    pub fn kernel_args(&self) -> &[String] {
        &self.kernel_args
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn provider_data(&self) -> &ProviderData {
        &self.provider_data
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    /// State accumulated so far, for steps to record progress in.
    pub fn state_mut(&mut self) -> &mut MachineState {
        &mut self.state
    }

    /// Machine identity reported back to the runtime, once known.
    pub fn machine_uuid(&self) -> Option<&str> {
        self.machine_uuid.as_deref()
    }

    pub(crate) fn set_machine_uuid(&mut self, uuid: impl Into<String>) {
        let uuid = uuid.into();
        if !uuid.is_empty() {
            self.machine_uuid = Some(uuid);
        }
    }

    /// Namespace the request's resources live in.
    ///
    /// Prefers the resolved namespace and falls back to the configured one
    /// for requests that never got past namespace resolution.
    pub fn namespace(&self) -> &str {
        if self.state.namespace.is_empty() {
            &self.provider_data.namespace
        } else {
            &self.state.namespace
        }
    }

    /// Splits the context into the state to persist and the machine UUID.
    pub fn into_parts(self) -> (MachineState, Option<String>) {
        (self.state, self.machine_uuid)
    }
}
