//! Harvester API client
//!
//! Implements `HarvesterClientTrait` on top of a `kube::Client`. Harvester
//! exposes boot images as `VirtualMachineImage` objects and VMs as KubeVirt
//! `VirtualMachine` objects; claims, namespaces and storage classes are
//! plain Kubernetes resources.

use crate::error::HarvesterError;
use crate::harvester_trait::{claim_phase, is_claim_bound, HarvesterClientTrait};
use crate::wait::{wait_for, WaitOutcome};
use async_trait::async_trait;
use crds::{VirtualMachine, VirtualMachineImage};
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use std::time::Duration;
use tracing::{debug, info};

/// Delete options for virtual machines.
///
/// Foreground propagation removes dependents (launcher pod, owned volumes)
/// before the VM object itself disappears.
fn virtual_machine_delete_params() -> DeleteParams {
    DeleteParams::foreground()
}

/// Harvester API client
#[derive(Clone)]
pub struct HarvesterClient {
    client: Client,
}

impl std::fmt::Debug for HarvesterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvesterClient").finish_non_exhaustive()
    }
}

impl HarvesterClient {
    /// Wraps an existing Kubernetes client pointed at the Harvester cluster.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the inferred kubeconfig or in-cluster config.
    pub async fn try_default() -> Result<Self, HarvesterError> {
        let client = Client::try_default().await.map_err(HarvesterError::Kube)?;
        Ok(Self::new(client))
    }

    fn images(&self, namespace: &str) -> Api<VirtualMachineImage> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn volume_claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn virtual_machines(&self, namespace: &str) -> Api<VirtualMachine> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl HarvesterClientTrait for HarvesterClient {
    async fn get_namespace(&self, name: &str) -> Result<Namespace, HarvesterError> {
        debug!("Fetching namespace {}", name);
        Api::<Namespace>::all(self.client.clone())
            .get(name)
            .await
            .map_err(|e| HarvesterError::from_kube(e, &format!("namespace {}", name)))
    }

    async fn get_storage_class(&self, name: &str) -> Result<StorageClass, HarvesterError> {
        debug!("Fetching storage class {}", name);
        Api::<StorageClass>::all(self.client.clone())
            .get(name)
            .await
            .map_err(|e| HarvesterError::from_kube(e, &format!("storage class {}", name)))
    }

    async fn list_images(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<VirtualMachineImage>, HarvesterError> {
        debug!("Listing images in {} matching {}", namespace, label_selector);
        let images = self
            .images(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| HarvesterError::from_kube(e, &format!("images in {}", namespace)))?;
        Ok(images.items)
    }

    async fn create_image(
        &self,
        namespace: &str,
        image: &VirtualMachineImage,
    ) -> Result<VirtualMachineImage, HarvesterError> {
        let what = image
            .metadata
            .name
            .clone()
            .or_else(|| image.metadata.generate_name.clone())
            .unwrap_or_default();
        debug!("Creating image {} in {}", what, namespace);
        self.images(namespace)
            .create(&PostParams::default(), image)
            .await
            .map_err(|e| HarvesterError::from_kube(e, &format!("image {}/{}", namespace, what)))
    }

    async fn wait_for_image(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<WaitOutcome<VirtualMachineImage>, HarvesterError> {
        wait_for(self.images(namespace), name, timeout, |image: &VirtualMachineImage| {
            info!("Image {}/{} import progress: {}%", namespace, name, image.progress());
            image.is_complete()
        })
        .await
    }

    async fn get_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, HarvesterError> {
        self.volume_claims(namespace)
            .get(name)
            .await
            .map_err(|e| HarvesterError::from_kube(e, &format!("claim {}/{}", namespace, name)))
    }

    async fn create_volume_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, HarvesterError> {
        let name = claim.metadata.name.clone().unwrap_or_default();
        debug!("Creating claim {} in {}", name, namespace);
        self.volume_claims(namespace)
            .create(&PostParams::default(), claim)
            .await
            .map_err(|e| HarvesterError::from_kube(e, &format!("claim {}/{}", namespace, name)))
    }

    async fn wait_for_volume_claim(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<WaitOutcome<PersistentVolumeClaim>, HarvesterError> {
        wait_for(self.volume_claims(namespace), name, timeout, |claim: &PersistentVolumeClaim| {
            info!("Claim {}/{} phase: {}", namespace, name, claim_phase(claim));
            is_claim_bound(claim)
        })
        .await
    }

    async fn get_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<VirtualMachine, HarvesterError> {
        self.virtual_machines(namespace)
            .get(name)
            .await
            .map_err(|e| HarvesterError::from_kube(e, &format!("virtual machine {}/{}", namespace, name)))
    }

    async fn create_virtual_machine(
        &self,
        namespace: &str,
        vm: &VirtualMachine,
    ) -> Result<VirtualMachine, HarvesterError> {
        let name = vm.metadata.name.clone().unwrap_or_default();
        debug!("Creating virtual machine {} in {}", name, namespace);
        self.virtual_machines(namespace)
            .create(&PostParams::default(), vm)
            .await
            .map_err(|e| HarvesterError::from_kube(e, &format!("virtual machine {}/{}", namespace, name)))
    }

    async fn replace_virtual_machine(
        &self,
        namespace: &str,
        vm: &VirtualMachine,
    ) -> Result<VirtualMachine, HarvesterError> {
        let name = vm.metadata.name.clone().unwrap_or_default();
        debug!("Replacing virtual machine {} in {}", name, namespace);
        self.virtual_machines(namespace)
            .replace(&name, &PostParams::default(), vm)
            .await
            .map_err(|e| HarvesterError::from_kube(e, &format!("virtual machine {}/{}", namespace, name)))
    }

    async fn delete_virtual_machine(&self, namespace: &str, name: &str) -> Result<(), HarvesterError> {
        debug!("Deleting virtual machine {} in {} (foreground)", name, namespace);
        self.virtual_machines(namespace)
            .delete(name, &virtual_machine_delete_params())
            .await
            .map(|_| ())
            .map_err(|e| HarvesterError::from_kube(e, &format!("virtual machine {}/{}", namespace, name)))
    }
}
