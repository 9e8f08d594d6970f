//! Test utilities for provisioning tests
//!
//! Builds a mock platform with the scenario's namespace and storage class,
//! a fake schematic generator and contexts for the scenario request.

use crate::context::{ProvisionContext, SchematicGenerator, SchematicRequest};
use crate::error::ProvisionError;
use crate::pipeline::{Provisioner, ProvisionerConfig, DEFAULT_IMAGE_FACTORY_URL};
use async_trait::async_trait;
use crds::{MachineState, ProviderData};
use harvester_client::MockHarvesterClient;
use reqwest::Url;
use std::sync::{Arc, Mutex};

pub const TEST_NAMESPACE: &str = "vms";
pub const TEST_STORAGE_CLASS: &str = "longhorn";
pub const TEST_TALOS_VERSION: &str = "v1.9.0";
pub const TEST_SCHEMATIC: &str = "376567988ad370138ad8b2698212367b8edcb69b5fd68c80be1f2ec7d603b4ba";

/// Schematic generator returning a fixed id and recording requests.
#[derive(Debug, Default)]
pub struct FakeSchematics {
    requests: Mutex<Vec<SchematicRequest>>,
    fail: bool,
}

impl FakeSchematics {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<SchematicRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchematicGenerator for FakeSchematics {
    async fn generate_schematic(&self, request: &SchematicRequest) -> Result<String, ProvisionError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(ProvisionError::Schematic("image factory unavailable".to_string()));
        }
        Ok(TEST_SCHEMATIC.to_string())
    }
}

/// `{arch: amd64, storageClass: longhorn, network: default/vlan1,
/// namespace: vms, memory: 4096, cores: 2, diskSize: 20}`
pub fn scenario_provider_data() -> ProviderData {
    ProviderData {
        architecture: "amd64".to_string(),
        storage_class: TEST_STORAGE_CLASS.to_string(),
        network_name: "vlan1".to_string(),
        network_namespace: "default".to_string(),
        namespace: TEST_NAMESPACE.to_string(),
        memory: 4096,
        cores: 2,
        disk_size: 20,
    }
}

/// Mock platform with the scenario namespace and storage class.
pub fn mock_platform() -> MockHarvesterClient {
    let mock = MockHarvesterClient::new();
    mock.add_namespace(TEST_NAMESPACE);
    mock.add_storage_class(TEST_STORAGE_CLASS);
    mock
}

pub fn provisioner_with(
    mock: &MockHarvesterClient,
    schematics: Arc<FakeSchematics>,
) -> Provisioner<MockHarvesterClient> {
    let config = ProvisionerConfig::new(Url::parse(DEFAULT_IMAGE_FACTORY_URL).unwrap());
    Provisioner::new(Arc::new(mock.clone()), schematics, config)
}

pub fn provisioner(mock: &MockHarvesterClient) -> Provisioner<MockHarvesterClient> {
    provisioner_with(mock, Arc::new(FakeSchematics::default()))
}

pub fn context(request_id: &str) -> ProvisionContext {
    ProvisionContext::new(request_id, TEST_TALOS_VERSION, scenario_provider_data())
}

/// Context resuming from state persisted by an earlier run.
pub fn resumed_context(request_id: &str, state: MachineState) -> ProvisionContext {
    context(request_id).with_state(state)
}
