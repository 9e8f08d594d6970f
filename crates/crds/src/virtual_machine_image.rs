//! VirtualMachineImage
//!
//! Harvester's boot image resource (`harvesterhci.io/v1beta1`). Only the
//! fields the provisioner reads or writes are modelled; the CRD itself is
//! owned by Harvester, so no schema is generated.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Progress value Harvester reports once an image is fully imported.
pub const IMAGE_PROGRESS_COMPLETE: i32 = 100;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[kube(
    group = "harvesterhci.io",
    version = "v1beta1",
    kind = "VirtualMachineImage",
    namespaced,
    status = "VirtualMachineImageStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineImageSpec {
    /// Name shown in the Harvester UI
    pub display_name: String,

    /// How the image is sourced
    #[serde(default)]
    pub source_type: ImageSourceType,

    /// Download URL for `download` images
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// Download retry budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ImageSourceType {
    #[default]
    Download,
    Upload,
    ExportFromVolume,
    Restore,
    Clone,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineImageStatus {
    /// Import progress, 0-100
    #[serde(default)]
    pub progress: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

impl VirtualMachineImage {
    /// Current import progress, 0 when no status has been reported yet.
    pub fn progress(&self) -> i32 {
        self.status.as_ref().map_or(0, |status| status.progress)
    }

    /// Whether the image has been fully imported.
    pub fn is_complete(&self) -> bool {
        self.progress() == IMAGE_PROGRESS_COMPLETE
    }
}
