//! Volume claim template annotation
//!
//! Harvester reads the `harvesterhci.io/volumeClaimTemplates` annotation on a
//! VM template to learn which claims back its disks. The value is a JSON
//! array of trimmed-down PVC objects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation key holding the serialized templates.
pub const VOLUME_CLAIM_TEMPLATES_ANNOTATION: &str = "harvesterhci.io/volumeClaimTemplates";

/// A single claim template.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct VolumeClaimTemplate {
    pub metadata: VolumeClaimTemplateMetadata,
    pub spec: VolumeClaimTemplateSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct VolumeClaimTemplateMetadata {
    pub name: String,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimTemplateSpec {
    pub access_modes: Vec<String>,
    pub resources: VolumeClaimTemplateResources,
    pub volume_mode: String,
    pub storage_class_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct VolumeClaimTemplateResources {
    pub requests: VolumeClaimTemplateRequests,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct VolumeClaimTemplateRequests {
    pub storage: String,
}

/// Serializes templates into the annotation value.
pub fn to_annotation(templates: &[VolumeClaimTemplate]) -> Result<String, serde_json::Error> {
    serde_json::to_string(templates)
}
