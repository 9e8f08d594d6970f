//! Provider data
//!
//! The provider-specific machine configuration attached to every machine
//! request. Keys are snake_case to match the provider's published schema.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Machine configuration requested for a single VM.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct ProviderData {
    /// Target CPU architecture (e.g. `amd64`, `arm64`)
    pub architecture: String,

    /// Storage class used to back the boot image
    pub storage_class: String,

    /// Name of the Multus network attachment
    pub network_name: String,

    /// Namespace of the Multus network attachment
    pub network_namespace: String,

    /// Namespace the machine resources are created in
    #[serde(default)]
    pub namespace: String,

    /// Memory in MiB
    pub memory: u64,

    /// CPU core count
    pub cores: u32,

    /// Primary disk size in GiB
    pub disk_size: u32,
}

impl ProviderData {
    /// Multus network reference in `<namespace>/<name>` form.
    pub fn network_ref(&self) -> String {
        format!("{}/{}", self.network_namespace, self.network_name)
    }

    /// Memory request as a Kubernetes quantity string.
    pub fn memory_quantity(&self) -> String {
        format!("{}Mi", self.memory)
    }

    /// Disk size as a Kubernetes quantity string.
    pub fn disk_quantity(&self) -> String {
        format!("{}Gi", self.disk_size)
    }
}
