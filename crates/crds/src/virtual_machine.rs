//! VirtualMachine
//!
//! KubeVirt's VM resource (`kubevirt.io/v1`) as consumed by Harvester. Only
//! the parts of the template the provisioner writes are modelled.

use k8s_openapi::api::core::v1::Affinity;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, Default)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachine",
    namespaced,
    status = "VirtualMachineStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Whether KubeVirt should keep an instance of the VM running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,

    /// Instance created when the VM starts
    pub template: VirtualMachineInstanceTemplateSpec,
}

/// Status fields reported by KubeVirt.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    /// An instance exists for the VM
    #[serde(default)]
    pub created: bool,

    /// The instance is running and ready
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: VirtualMachineInstanceSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    /// Guest CPU architecture; empty leaves the cluster default
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,

    pub domain: DomainSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    /// Memory requests, keyed by resource name
    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Virtual CPU topology
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,

    /// SMBIOS UUID and boot firmware
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<Firmware>,

    /// Disks, NICs and input devices attached to the guest
    #[serde(default)]
    pub devices: Devices,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Cpu {
    pub cores: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Firmware {
    /// SMBIOS UUID presented to the guest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootloader: Option<Bootloader>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Bootloader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efi: Option<Efi>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Efi {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_boot: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Devices {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Input>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiskTarget {
    pub bus: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Interface {
    pub name: String,

    /// Bridge binding; serialized as an empty object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BTreeMap<String, String>>,
}

impl Interface {
    /// KubeVirt's default bridge interface bound to the `default` network.
    pub fn default_bridge() -> Self {
        Self {
            name: "default".to_string(),
            bridge: Some(BTreeMap::new()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Input {
    pub name: String,
    pub bus: String,
    #[serde(rename = "type")]
    pub input_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Network {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multus: Option<MultusNetwork>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MultusNetwork {
    pub network_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimVolumeSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init_no_cloud: Option<CloudInitNoCloudSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimVolumeSource {
    pub claim_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitNoCloudSource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_data: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bridge_serializes_as_empty_object() {
        let value = serde_json::to_value(Interface::default_bridge()).unwrap();
        assert_eq!(value, serde_json::json!({ "name": "default", "bridge": {} }));
    }

    #[test]
    fn test_input_type_field_name() {
        let input = Input {
            name: "tablet".to_string(),
            bus: "usb".to_string(),
            input_type: "tablet".to_string(),
        };
        let value = serde_json::to_value(input).unwrap();
        assert_eq!(value["type"], "tablet");
    }

    #[test]
    fn test_volume_sources_are_camel_case() {
        let volume = Volume {
            name: "disk0".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: "machine-1-disk-0-0f3b5c1e".to_string(),
            }),
            cloud_init_no_cloud: None,
        };
        let value = serde_json::to_value(volume).unwrap();
        assert_eq!(
            value["persistentVolumeClaim"]["claimName"],
            "machine-1-disk-0-0f3b5c1e"
        );
        assert!(value.get("cloudInitNoCloud").is_none());
    }
}
