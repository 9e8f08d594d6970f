//! Machine state
//!
//! Provisioning state persisted between pipeline invocations. Fields are
//! filled in progressively and never reset to empty once set.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Disk slot used for the primary disk's claim name.
pub const PRIMARY_DISK_SLOT: &str = "disk-0";

/// Persisted provisioning state of one machine request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineState {
    /// Namespace the machine resources live in
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Image factory schematic id
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schematic: String,

    /// Talos version the boot image was built for
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub talos_version: String,

    /// Name of the boot image (VirtualMachineImage)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume_id: String,

    /// Stable machine UUID, shared by the VM firmware and its claim name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
}

/// Writes `value` into `slot` unless it is empty.
fn accumulate(slot: &mut String, value: impl Into<String>) {
    let value = value.into();
    if !value.is_empty() {
        *slot = value;
    }
}

impl MachineState {
    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        accumulate(&mut self.namespace, namespace);
    }

    pub fn set_schematic(&mut self, schematic: impl Into<String>) {
        accumulate(&mut self.schematic, schematic);
    }

    pub fn set_talos_version(&mut self, version: impl Into<String>) {
        accumulate(&mut self.talos_version, version);
    }

    pub fn set_volume_id(&mut self, volume_id: impl Into<String>) {
        accumulate(&mut self.volume_id, volume_id);
    }

    /// Returns the machine UUID, generating it with `generate` on first use.
    ///
    /// An existing UUID is never replaced.
    pub fn uuid_or_insert_with(&mut self, generate: impl FnOnce() -> String) -> &str {
        if self.uuid.is_empty() {
            accumulate(&mut self.uuid, generate());
        }
        &self.uuid
    }

    /// Deterministic name of the primary disk's claim:
    /// `<request id>-disk-0-<first 8 chars of the UUID>`.
    pub fn claim_name(&self, request_id: &str) -> String {
        let short: String = self.uuid.chars().take(8).collect();
        format!("{}-{}-{}", request_id, PRIMARY_DISK_SLOT, short)
    }

    /// Harvester image reference (`<namespace>/<volume id>`).
    pub fn image_ref(&self) -> String {
        format!("{}/{}", self.namespace, self.volume_id)
    }

    /// Storage class Harvester creates for the boot image.
    pub fn image_storage_class(&self) -> String {
        format!("longhorn-{}", self.volume_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_ignore_empty_values() {
        let mut state = MachineState::default();
        state.set_namespace("vms");
        state.set_schematic("abc123");
        state.set_volume_id("talos-0011223344-x7k2p");

        state.set_namespace("");
        state.set_schematic(String::new());
        state.set_volume_id("");

        assert_eq!(state.namespace, "vms");
        assert_eq!(state.schematic, "abc123");
        assert_eq!(state.volume_id, "talos-0011223344-x7k2p");
    }

    #[test]
    fn test_uuid_is_generated_once() {
        let mut state = MachineState::default();
        let first = state
            .uuid_or_insert_with(|| "0f3b5c1e-1111-2222-3333-444455556666".to_string())
            .to_string();
        let second = state.uuid_or_insert_with(|| "ffffffff-0000-0000-0000-000000000000".to_string());

        assert_eq!(first, second);
        assert_eq!(state.uuid, "0f3b5c1e-1111-2222-3333-444455556666");
    }

    #[test]
    fn test_claim_name_uses_uuid_prefix() {
        let state = MachineState {
            uuid: "0f3b5c1e-1111-2222-3333-444455556666".to_string(),
            ..Default::default()
        };

        assert_eq!(state.claim_name("machine-1"), "machine-1-disk-0-0f3b5c1e");
    }

    #[test]
    fn test_image_references() {
        let state = MachineState {
            namespace: "vms".to_string(),
            volume_id: "talos-0011223344-x7k2p".to_string(),
            ..Default::default()
        };

        assert_eq!(state.image_ref(), "vms/talos-0011223344-x7k2p");
        assert_eq!(state.image_storage_class(), "longhorn-talos-0011223344-x7k2p");
    }

    #[test]
    fn test_empty_fields_are_not_serialized() {
        let state = MachineState {
            schematic: "abc123".to_string(),
            ..Default::default()
        };

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value, serde_json::json!({ "schematic": "abc123" }));
    }
}
