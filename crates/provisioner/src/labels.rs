//! Labels and annotations written on Harvester resources.

use std::collections::BTreeMap;

/// Name the provider identifies itself with in creator tags.
pub const PROVIDER_NAME: &str = "omni-infra-provider-harvester";

pub const CREATED_BY_LABEL: &str = "tag.harvesterhci.io/created-by";
pub const MANAGED_BY_LABEL: &str = "tag.harvesterhci.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "omni";
pub const CREATOR_LABEL: &str = "harvesterhci.io/creator";
pub const VM_NAME_LABEL: &str = "harvesterhci.io/vmName";

/// Label carrying the content-addressed image identifier.
pub const VOLUME_ID_LABEL: &str = "omni.siderolabs.io/volume-id";

pub const STORAGE_CLASS_ANNOTATION: &str = "harvesterhci.io/storageClassName";
pub const IMAGE_ID_ANNOTATION: &str = "harvesterhci.io/imageId";

/// Creator tags shared by images and VM templates.
pub fn creator_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (CREATED_BY_LABEL.to_string(), PROVIDER_NAME.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (CREATOR_LABEL.to_string(), PROVIDER_NAME.to_string()),
    ])
}

/// Selector matching images with the given identifier.
pub fn volume_id_selector(identifier: &str) -> String {
    format!("{}={}", VOLUME_ID_LABEL, identifier)
}
