//! MachineRequest CRD
//!
//! Requests a Talos VM on Harvester. The status carries the provisioning
//! state that survives between reconciliations.

use crate::machine_state::MachineState;
use crate::provider_data::ProviderData;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infra.harvester-provider.io",
    version = "v1alpha1",
    kind = "MachineRequest",
    namespaced,
    status = "MachineRequestStatus",
    shortname = "mr",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"UUID","type":"string","jsonPath":".status.machineUuid"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineRequestSpec {
    /// Talos version to boot (e.g. `v1.9.0`)
    pub talos_version: String,

    /// Extra kernel arguments baked into the schematic
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernel_args: Vec<String>,

    /// Official Talos system extensions baked into the schematic
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,

    /// Provider-specific machine configuration
    pub provider_data: ProviderData,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineRequestStatus {
    /// Accumulated provisioning state
    #[serde(default)]
    pub state: MachineState,

    /// Current provisioning phase
    #[serde(default)]
    pub phase: ProvisionPhase,

    /// Machine UUID reported to consumers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_uuid: Option<String>,

    /// Consecutive failed reconciliations
    #[serde(default)]
    pub failures: u32,

    /// Generation the status was last computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last reconciliation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,

    /// Error message if the last reconciliation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum ProvisionPhase {
    /// Not reconciled yet
    #[default]
    Pending,

    /// Pipeline asked to be re-invoked later
    Provisioning,

    /// Every step reported done
    Provisioned,

    /// The last run hit a fatal error
    Failed,

    /// Withdrawn, teardown in progress
    Deprovisioning,
}

impl MachineRequest {
    /// Persisted state, or an empty state for a fresh request.
    pub fn machine_state(&self) -> MachineState {
        self.status
            .as_ref()
            .map(|status| status.state.clone())
            .unwrap_or_default()
    }

    /// Consecutive failures recorded in status.
    pub fn failures(&self) -> u32 {
        self.status.as_ref().map_or(0, |status| status.failures)
    }
}
