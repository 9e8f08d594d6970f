//! Mock HarvesterClient for unit testing
//!
//! Stores resources in memory, counts mutating calls and can be told to
//! fail individual operations, so provisioning logic can be exercised
//! without a running Harvester cluster.

use crate::error::HarvesterError;
use crate::harvester_trait::{is_claim_bound, HarvesterClientTrait, CLAIM_BOUND_PHASE};
use crate::wait::WaitOutcome;
use async_trait::async_trait;
use crds::{VirtualMachine, VirtualMachineImage, VirtualMachineImageStatus};
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, PersistentVolumeClaimStatus};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Number of calls made to each operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    /// Image lookups by label selector
    pub list_images: usize,
    /// Image creations
    pub create_image: usize,
    /// Waits on image import
    pub wait_for_image: usize,
    /// Claim creations
    pub create_volume_claim: usize,
    /// Waits on claim binding
    pub wait_for_volume_claim: usize,
    /// Virtual machine lookups
    pub get_virtual_machine: usize,
    /// Virtual machine creations
    pub create_virtual_machine: usize,
    /// Virtual machine replacements
    pub replace_virtual_machine: usize,
    /// Virtual machine deletions
    pub delete_virtual_machine: usize,
}

/// How an injected failure surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Unavailable,
    Rejected,
    Conflict,
}

impl MockCalls {
    /// Total number of create/replace/delete calls.
    pub fn mutations(&self) -> usize {
        self.create_image
            + self.create_volume_claim
            + self.create_virtual_machine
            + self.replace_virtual_machine
            + self.delete_virtual_machine
    }
}

/// Mock HarvesterClient for testing
#[derive(Clone, Debug)]
pub struct MockHarvesterClient {
    namespaces: Arc<Mutex<HashSet<String>>>,
    storage_classes: Arc<Mutex<HashSet<String>>>,
    images: Arc<Mutex<BTreeMap<Key, VirtualMachineImage>>>,
    volume_claims: Arc<Mutex<BTreeMap<Key, PersistentVolumeClaim>>>,
    virtual_machines: Arc<Mutex<BTreeMap<Key, VirtualMachine>>>,
    calls: Arc<Mutex<MockCalls>>,
    // Operation names that fail, and how
    failing: Arc<Mutex<HashMap<&'static str, Failure>>>,
    // Lookups that miss existing objects on their next call
    stale_lookups: Arc<Mutex<HashSet<&'static str>>>,
    // Simulated platform progress for newly created objects
    image_progress_on_create: Arc<Mutex<i32>>,
    claim_phase_on_create: Arc<Mutex<String>>,
    next_id: Arc<Mutex<u64>>,
}

impl Default for MockHarvesterClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHarvesterClient {
    /// Create a new mock client.
    ///
    /// Images complete and claims bind as soon as they are created unless
    /// configured otherwise.
    pub fn new() -> Self {
        Self {
            namespaces: Arc::new(Mutex::new(HashSet::new())),
            storage_classes: Arc::new(Mutex::new(HashSet::new())),
            images: Arc::new(Mutex::new(BTreeMap::new())),
            volume_claims: Arc::new(Mutex::new(BTreeMap::new())),
            virtual_machines: Arc::new(Mutex::new(BTreeMap::new())),
            calls: Arc::new(Mutex::new(MockCalls::default())),
            failing: Arc::new(Mutex::new(HashMap::new())),
            stale_lookups: Arc::new(Mutex::new(HashSet::new())),
            image_progress_on_create: Arc::new(Mutex::new(100)),
            claim_phase_on_create: Arc::new(Mutex::new(CLAIM_BOUND_PHASE.to_string())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Add a namespace (for test setup)
    pub fn add_namespace(&self, name: &str) {
        self.namespaces.lock().unwrap().insert(name.to_string());
    }

    /// Add a storage class (for test setup)
    pub fn add_storage_class(&self, name: &str) {
        self.storage_classes.lock().unwrap().insert(name.to_string());
    }

    /// Add an image (for test setup)
    pub fn add_image(&self, namespace: &str, image: VirtualMachineImage) {
        let name = image.metadata.name.clone().unwrap_or_default();
        self.images.lock().unwrap().insert(key(namespace, &name), image);
    }

    /// Add a claim (for test setup)
    pub fn add_volume_claim(&self, namespace: &str, claim: PersistentVolumeClaim) {
        let name = claim.metadata.name.clone().unwrap_or_default();
        self.volume_claims.lock().unwrap().insert(key(namespace, &name), claim);
    }

    /// Add a virtual machine (for test setup)
    pub fn add_virtual_machine(&self, namespace: &str, vm: VirtualMachine) {
        let name = vm.metadata.name.clone().unwrap_or_default();
        self.virtual_machines.lock().unwrap().insert(key(namespace, &name), vm);
    }

    /// Progress newly created images report (default 100).
    pub fn set_image_progress_on_create(&self, progress: i32) {
        *self.image_progress_on_create.lock().unwrap() = progress;
    }

    /// Phase newly created claims report (default `Bound`).
    pub fn set_claim_phase_on_create(&self, phase: &str) {
        *self.claim_phase_on_create.lock().unwrap() = phase.to_string();
    }

    /// Make the named operation fail as if the API were unavailable.
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation, Failure::Unavailable);
    }

    /// Make the named operation fail with a rejection that retrying won't fix.
    pub fn reject(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation, Failure::Rejected);
    }

    /// Make the named operation report that the object already exists.
    pub fn conflict(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation, Failure::Conflict);
    }

    /// Make the next call of the named lookup miss existing objects, like a
    /// read that raced a concurrent create.
    pub fn stale_lookup(&self, operation: &'static str) {
        self.stale_lookups.lock().unwrap().insert(operation);
    }

    /// Stop failing the named operation.
    pub fn recover(&self, operation: &'static str) {
        self.failing.lock().unwrap().remove(operation);
    }

    /// Mark every stored image as fully imported.
    pub fn complete_images(&self) {
        for image in self.images.lock().unwrap().values_mut() {
            image.status = Some(VirtualMachineImageStatus {
                progress: 100,
                ..Default::default()
            });
        }
    }

    /// Mark every stored claim as bound.
    pub fn bind_volume_claims(&self) {
        for claim in self.volume_claims.lock().unwrap().values_mut() {
            claim.status = Some(PersistentVolumeClaimStatus {
                phase: Some(CLAIM_BOUND_PHASE.to_string()),
                ..Default::default()
            });
        }
    }

    /// Snapshot of the stored images.
    pub fn images(&self) -> Vec<VirtualMachineImage> {
        self.images.lock().unwrap().values().cloned().collect()
    }

    /// Snapshot of the stored claims.
    pub fn volume_claims(&self) -> Vec<PersistentVolumeClaim> {
        self.volume_claims.lock().unwrap().values().cloned().collect()
    }

    /// Snapshot of the stored VMs.
    pub fn virtual_machines(&self) -> Vec<VirtualMachine> {
        self.virtual_machines.lock().unwrap().values().cloned().collect()
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> MockCalls {
        self.calls.lock().unwrap().clone()
    }

    /// Reset the call counters, keeping stored resources.
    pub fn reset_calls(&self) {
        *self.calls.lock().unwrap() = MockCalls::default();
    }

    fn check(&self, operation: &'static str) -> Result<(), HarvesterError> {
        match self.failing.lock().unwrap().get(operation) {
            None => Ok(()),
            Some(Failure::Unavailable) => Err(HarvesterError::Unavailable(format!("{} failed (injected)", operation))),
            Some(Failure::Rejected) => Err(HarvesterError::Api(format!("{} rejected (injected)", operation))),
            Some(Failure::Conflict) => Err(HarvesterError::AlreadyExists(format!("{} (injected)", operation))),
        }
    }

    fn is_stale(&self, operation: &'static str) -> bool {
        self.stale_lookups.lock().unwrap().remove(operation)
    }

    fn record(&self, count: impl FnOnce(&mut MockCalls)) {
        count(&mut self.calls.lock().unwrap());
    }

    /// Resolve the object name, honouring `generateName`.
    fn assign_name(&self, metadata: &mut ObjectMeta, namespace: &str) -> String {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;

        if metadata.name.is_none() {
            let prefix = metadata.generate_name.clone().unwrap_or_default();
            metadata.name = Some(format!("{}{:05x}", prefix, current));
        }
        metadata.namespace = Some(namespace.to_string());
        metadata.uid = Some(format!("uid-{}", current));
        metadata.resource_version = Some(current.to_string());
        metadata.name.clone().unwrap_or_default()
    }
}

/// Equality-based label selector match (`k=v,k2=v2`).
fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.and_then(|labels| labels.get(k.trim())).map(String::as_str) == Some(v.trim()),
            None => labels.is_some_and(|labels| labels.contains_key(term.trim())),
        })
}

#[async_trait]
impl HarvesterClientTrait for MockHarvesterClient {
    async fn get_namespace(&self, name: &str) -> Result<Namespace, HarvesterError> {
        self.check("get_namespace")?;
        if !self.namespaces.lock().unwrap().contains(name) {
            return Err(HarvesterError::NotFound(format!("namespace {}", name)));
        }
        Ok(Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    async fn get_storage_class(&self, name: &str) -> Result<StorageClass, HarvesterError> {
        self.check("get_storage_class")?;
        if !self.storage_classes.lock().unwrap().contains(name) {
            return Err(HarvesterError::NotFound(format!("storage class {}", name)));
        }
        Ok(StorageClass {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            provisioner: "driver.longhorn.io".to_string(),
            ..Default::default()
        })
    }

    async fn list_images(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<VirtualMachineImage>, HarvesterError> {
        self.record(|calls| calls.list_images += 1);
        self.check("list_images")?;
        if self.is_stale("list_images") {
            return Ok(Vec::new());
        }
        Ok(self
            .images
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), image)| {
                ns == namespace && selector_matches(label_selector, image.metadata.labels.as_ref())
            })
            .map(|(_, image)| image.clone())
            .collect())
    }

    async fn create_image(
        &self,
        namespace: &str,
        image: &VirtualMachineImage,
    ) -> Result<VirtualMachineImage, HarvesterError> {
        self.record(|calls| calls.create_image += 1);
        self.check("create_image")?;

        let mut created = image.clone();
        let name = self.assign_name(&mut created.metadata, namespace);
        let mut images = self.images.lock().unwrap();
        if images.contains_key(&key(namespace, &name)) {
            return Err(HarvesterError::AlreadyExists(format!("image {}/{}", namespace, name)));
        }
        created.status = Some(VirtualMachineImageStatus {
            progress: *self.image_progress_on_create.lock().unwrap(),
            ..Default::default()
        });
        images.insert(key(namespace, &name), created.clone());
        Ok(created)
    }

    async fn wait_for_image(
        &self,
        namespace: &str,
        name: &str,
        _timeout: Duration,
    ) -> Result<WaitOutcome<VirtualMachineImage>, HarvesterError> {
        self.record(|calls| calls.wait_for_image += 1);
        self.check("wait_for_image")?;
        match self.images.lock().unwrap().get(&key(namespace, name)) {
            Some(image) if image.is_complete() => Ok(WaitOutcome::Ready(image.clone())),
            _ => Ok(WaitOutcome::NotReady),
        }
    }

    async fn get_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, HarvesterError> {
        self.check("get_volume_claim")?;
        if self.is_stale("get_volume_claim") {
            return Err(HarvesterError::NotFound(format!("claim {}/{}", namespace, name)));
        }
        self.volume_claims
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| HarvesterError::NotFound(format!("claim {}/{}", namespace, name)))
    }

    async fn create_volume_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, HarvesterError> {
        self.record(|calls| calls.create_volume_claim += 1);
        self.check("create_volume_claim")?;

        let mut created = claim.clone();
        let name = self.assign_name(&mut created.metadata, namespace);
        let mut claims = self.volume_claims.lock().unwrap();
        if claims.contains_key(&key(namespace, &name)) {
            return Err(HarvesterError::AlreadyExists(format!("claim {}/{}", namespace, name)));
        }
        created.status = Some(PersistentVolumeClaimStatus {
            phase: Some(self.claim_phase_on_create.lock().unwrap().clone()),
            ..Default::default()
        });
        claims.insert(key(namespace, &name), created.clone());
        Ok(created)
    }

    async fn wait_for_volume_claim(
        &self,
        namespace: &str,
        name: &str,
        _timeout: Duration,
    ) -> Result<WaitOutcome<PersistentVolumeClaim>, HarvesterError> {
        self.record(|calls| calls.wait_for_volume_claim += 1);
        self.check("wait_for_volume_claim")?;
        match self.volume_claims.lock().unwrap().get(&key(namespace, name)) {
            Some(claim) if is_claim_bound(claim) => Ok(WaitOutcome::Ready(claim.clone())),
            _ => Ok(WaitOutcome::NotReady),
        }
    }

    async fn get_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<VirtualMachine, HarvesterError> {
        self.record(|calls| calls.get_virtual_machine += 1);
        self.check("get_virtual_machine")?;
        if self.is_stale("get_virtual_machine") {
            return Err(HarvesterError::NotFound(format!("virtual machine {}/{}", namespace, name)));
        }
        self.virtual_machines
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| HarvesterError::NotFound(format!("virtual machine {}/{}", namespace, name)))
    }

    async fn create_virtual_machine(
        &self,
        namespace: &str,
        vm: &VirtualMachine,
    ) -> Result<VirtualMachine, HarvesterError> {
        self.record(|calls| calls.create_virtual_machine += 1);
        self.check("create_virtual_machine")?;

        let mut created = vm.clone();
        let name = self.assign_name(&mut created.metadata, namespace);
        let mut vms = self.virtual_machines.lock().unwrap();
        if vms.contains_key(&key(namespace, &name)) {
            return Err(HarvesterError::AlreadyExists(format!("virtual machine {}/{}", namespace, name)));
        }
        vms.insert(key(namespace, &name), created.clone());
        Ok(created)
    }

    async fn replace_virtual_machine(
        &self,
        namespace: &str,
        vm: &VirtualMachine,
    ) -> Result<VirtualMachine, HarvesterError> {
        self.record(|calls| calls.replace_virtual_machine += 1);
        self.check("replace_virtual_machine")?;

        let name = vm.metadata.name.clone().unwrap_or_default();
        let mut vms = self.virtual_machines.lock().unwrap();
        let Some(stored) = vms.get(&key(namespace, &name)) else {
            return Err(HarvesterError::NotFound(format!("virtual machine {}/{}", namespace, name)));
        };
        // Custom resources only accept updates against the stored version.
        if vm.metadata.resource_version.is_none()
            || vm.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(HarvesterError::Api(format!(
                "virtual machine {}/{}: metadata.resourceVersion must match for an update",
                namespace, name
            )));
        }

        let mut replaced = vm.clone();
        let mut id = self.next_id.lock().unwrap();
        replaced.metadata.resource_version = Some(id.to_string());
        *id += 1;
        vms.insert(key(namespace, &name), replaced.clone());
        Ok(replaced)
    }

    async fn delete_virtual_machine(&self, namespace: &str, name: &str) -> Result<(), HarvesterError> {
        self.record(|calls| calls.delete_virtual_machine += 1);
        self.check("delete_virtual_machine")?;
        self.virtual_machines
            .lock()
            .unwrap()
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| HarvesterError::NotFound(format!("virtual machine {}/{}", namespace, name)))
    }
}
