//! HarvesterClient trait for mocking
//!
//! This trait abstracts the Harvester API so the provisioner can be unit
//! tested against an in-memory implementation.

use crate::error::HarvesterError;
use crate::wait::WaitOutcome;
use async_trait::async_trait;
use crds::{VirtualMachine, VirtualMachineImage};
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use std::time::Duration;

/// Operations the provisioner issues against Harvester.
///
/// Lookups of absent objects return `HarvesterError::NotFound`; creates of
/// existing names return `HarvesterError::AlreadyExists`.
#[async_trait]
pub trait HarvesterClientTrait: Send + Sync {
    // Cluster-scoped lookups
    async fn get_namespace(&self, name: &str) -> Result<Namespace, HarvesterError>;
    async fn get_storage_class(&self, name: &str) -> Result<StorageClass, HarvesterError>;

    // Boot images
    async fn list_images(&self, namespace: &str, label_selector: &str) -> Result<Vec<VirtualMachineImage>, HarvesterError>;
    async fn create_image(&self, namespace: &str, image: &VirtualMachineImage) -> Result<VirtualMachineImage, HarvesterError>;
    /// Waits until the image reports full progress.
    async fn wait_for_image(&self, namespace: &str, name: &str, timeout: Duration) -> Result<WaitOutcome<VirtualMachineImage>, HarvesterError>;

    // Storage claims
    async fn get_volume_claim(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim, HarvesterError>;
    async fn create_volume_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, HarvesterError>;
    /// Waits until the claim reaches the `Bound` phase.
    async fn wait_for_volume_claim(&self, namespace: &str, name: &str, timeout: Duration) -> Result<WaitOutcome<PersistentVolumeClaim>, HarvesterError>;

    // Virtual machines
    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<VirtualMachine, HarvesterError>;
    async fn create_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, HarvesterError>;
    async fn replace_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, HarvesterError>;
    /// Deletes with foreground propagation so dependents go first.
    async fn delete_virtual_machine(&self, namespace: &str, name: &str) -> Result<(), HarvesterError>;
}

/// Phase a claim reports once bound to a volume.
pub const CLAIM_BOUND_PHASE: &str = "Bound";

/// Current phase of a claim, empty when not reported yet.
pub fn claim_phase(claim: &PersistentVolumeClaim) -> &str {
    claim
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or_default()
}

/// Whether the claim is bound.
pub fn is_claim_bound(claim: &PersistentVolumeClaim) -> bool {
    claim_phase(claim) == CLAIM_BOUND_PHASE
}
