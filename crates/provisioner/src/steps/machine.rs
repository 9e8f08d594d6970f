//! Virtual machine step
//!
//! Creates the KubeVirt VM once. An existing VM is left alone: readiness and
//! drift are observed by the runtime, not reconciled here.

use crate::context::ProvisionContext;
use crate::error::ProvisionError;
use crate::labels::{creator_labels, CREATOR_LABEL, IMAGE_ID_ANNOTATION, VM_NAME_LABEL};
use crate::pipeline::{Outcome, Provisioner};
use crate::steps::volume_claim::BLOCK_VOLUME_MODE;
use crds::{
    to_annotation, Bootloader, CloudInitNoCloudSource, Cpu, Devices, Disk, DiskTarget, DomainSpec,
    Efi, Firmware, Input, Interface, MachineState, MultusNetwork, Network,
    PersistentVolumeClaimVolumeSource, ProviderData, ResourceRequirements, VirtualMachine,
    VirtualMachineInstanceSpec, VirtualMachineInstanceTemplateSpec, VirtualMachineSpec, Volume,
    VolumeClaimTemplate, VolumeClaimTemplateMetadata, VolumeClaimTemplateRequests,
    VolumeClaimTemplateResources, VolumeClaimTemplateSpec, VOLUME_CLAIM_TEMPLATES_ANNOTATION,
};
use harvester_client::HarvesterClientTrait;
use k8s_openapi::api::core::v1::{
    Affinity, PodAffinityTerm, PodAntiAffinity, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use std::collections::BTreeMap;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// NoCloud seed handed to every VM.
pub const CLOUD_INIT_USER_DATA: &str =
    "#cloud-config\npassword: talos\nchpasswd: { expire: False }\nssh_pwauth: True\n";

const PRIMARY_DISK: &str = "disk0";
const CLOUD_INIT_DISK: &str = "cloudinitdisk";
const DEFAULT_NETWORK: &str = "default";
const VIRTIO_BUS: &str = "virtio";
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";
// Access mode Harvester expects in the template annotation
const TEMPLATE_ACCESS_MODE: &str = "ReadWriteOnce";

/// Prefer spreading provider VMs across hosts.
fn spread_across_hosts() -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_expressions: Some(vec![LabelSelectorRequirement {
                                key: CREATOR_LABEL.to_string(),
                                operator: "Exists".to_string(),
                                values: None,
                            }]),
                            ..Default::default()
                        }),
                        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn virtio_disk(name: &str, boot_order: Option<u32>) -> Disk {
    Disk {
        name: name.to_string(),
        boot_order,
        disk: Some(DiskTarget {
            bus: VIRTIO_BUS.to_string(),
        }),
    }
}

/// Template Harvester uses to manage the primary disk's claim.
fn primary_disk_template(claim_name: &str, state: &MachineState, data: &ProviderData) -> VolumeClaimTemplate {
    VolumeClaimTemplate {
        metadata: VolumeClaimTemplateMetadata {
            name: claim_name.to_string(),
            annotations: BTreeMap::from([(IMAGE_ID_ANNOTATION.to_string(), state.image_ref())]),
        },
        spec: VolumeClaimTemplateSpec {
            access_modes: vec![TEMPLATE_ACCESS_MODE.to_string()],
            resources: VolumeClaimTemplateResources {
                requests: VolumeClaimTemplateRequests {
                    storage: data.disk_quantity(),
                },
            },
            volume_mode: BLOCK_VOLUME_MODE.to_string(),
            storage_class_name: state.image_storage_class(),
        },
    }
}

/// Desired VM for a request whose state already carries its UUID,
/// namespace and volume id.
pub fn build_virtual_machine(
    request_id: &str,
    state: &MachineState,
    data: &ProviderData,
) -> Result<VirtualMachine, serde_json::Error> {
    let claim_name = state.claim_name(request_id);
    let annotation = to_annotation(&[primary_disk_template(&claim_name, state, data)])?;

    let mut labels = creator_labels();
    labels.insert(VM_NAME_LABEL.to_string(), request_id.to_string());

    let domain = DomainSpec {
        resources: ResourceRequirements {
            requests: BTreeMap::from([("memory".to_string(), Quantity(data.memory_quantity()))]),
        },
        cpu: Some(Cpu { cores: data.cores }),
        firmware: Some(Firmware {
            uuid: Some(state.uuid.clone()),
            bootloader: Some(Bootloader {
                efi: Some(Efi {
                    secure_boot: Some(false),
                }),
            }),
        }),
        devices: Devices {
            disks: vec![
                virtio_disk(PRIMARY_DISK, Some(1)),
                virtio_disk(CLOUD_INIT_DISK, None),
            ],
            interfaces: vec![Interface::default_bridge()],
            inputs: vec![Input {
                name: "tablet".to_string(),
                bus: "usb".to_string(),
                input_type: "tablet".to_string(),
            }],
        },
    };

    let spec = VirtualMachineInstanceSpec {
        architecture: data.architecture.clone(),
        domain,
        affinity: Some(spread_across_hosts()),
        networks: vec![Network {
            name: DEFAULT_NETWORK.to_string(),
            multus: Some(MultusNetwork {
                network_name: data.network_ref(),
            }),
        }],
        volumes: vec![
            Volume {
                name: PRIMARY_DISK.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource { claim_name }),
                cloud_init_no_cloud: None,
            },
            Volume {
                name: CLOUD_INIT_DISK.to_string(),
                persistent_volume_claim: None,
                cloud_init_no_cloud: Some(CloudInitNoCloudSource {
                    user_data: CLOUD_INIT_USER_DATA.to_string(),
                    network_data: String::new(),
                }),
            },
        ],
    };

    let mut vm = VirtualMachine::new(
        request_id,
        VirtualMachineSpec {
            running: Some(true),
            template: VirtualMachineInstanceTemplateSpec {
                metadata: ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(BTreeMap::from([(
                        VOLUME_CLAIM_TEMPLATES_ANNOTATION.to_string(),
                        annotation,
                    )])),
                    ..Default::default()
                },
                spec,
            },
        },
    );
    vm.metadata.namespace = Some(state.namespace.clone());
    Ok(vm)
}

impl<C: HarvesterClientTrait> Provisioner<C> {
    /// Creates the VM unless it exists, then reports the machine UUID.
    ///
    /// A successful create still asks for a retry: power-on and address
    /// assignment are observed by the runtime.
    pub(crate) async fn sync_machine(
        &self,
        ctx: &mut ProvisionContext,
    ) -> Result<Outcome, ProvisionError> {
        let uuid = ctx
            .state_mut()
            .uuid_or_insert_with(|| Uuid::new_v4().to_string())
            .to_string();

        let result = self
            .apply_machine(ctx)
            .instrument(info_span!("machine", id = %uuid))
            .await;
        ctx.set_machine_uuid(uuid);
        result
    }

    async fn apply_machine(&self, ctx: &ProvisionContext) -> Result<Outcome, ProvisionError> {
        let namespace = ctx.namespace();
        let name = ctx.request_id();

        match self.client.get_virtual_machine(namespace, name).await {
            Ok(_) => {
                info!("Virtual machine {} already exists", name);
                return Ok(Outcome::Continue);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return self.retry_transient(e, &format!("look up virtual machine {}", name)),
        }

        let mut vm = build_virtual_machine(name, ctx.state(), ctx.provider_data())?;
        match self.client.create_virtual_machine(namespace, &vm).await {
            Ok(_) => info!("Created virtual machine {}", name),
            Err(e) if e.is_already_exists() => {
                // Created between the lookup and the create; update it in place.
                let existing = match self.client.get_virtual_machine(namespace, name).await {
                    Ok(existing) => existing,
                    Err(e) if e.is_not_found() => {
                        warn!("Virtual machine {} disappeared before it could be updated", name);
                        return Ok(self.retry());
                    }
                    Err(e) => return self.retry_transient(e, &format!("look up virtual machine {}", name)),
                };
                vm.metadata.resource_version = existing.metadata.resource_version;
                if let Err(e) = self.client.replace_virtual_machine(namespace, &vm).await {
                    return self.retry_transient(e, &format!("update virtual machine {}", name));
                }
                info!("Updated virtual machine {}", name);
            }
            Err(e) => return self.retry_transient(e, &format!("create virtual machine {}", name)),
        }

        Ok(self.retry())
    }
}
