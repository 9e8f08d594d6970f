//! Unit tests for the provisioning pipeline and deprovisioning

#[cfg(test)]
mod tests {
    use crate::identity::ImageSource;
    use crate::labels::VOLUME_ID_LABEL;
    use crate::pipeline::{Outcome, Step, PROVISION_RETRY_INTERVAL, DEPROVISION_RETRY_INTERVAL};
    use crate::test_utils::*;
    use crate::ProvisionError;
    use crds::{
        MachineState, VirtualMachine, VirtualMachineImage, VirtualMachineImageSpec,
        VirtualMachineImageStatus, VirtualMachineSpec,
    };
    use harvester_client::{HarvesterClientTrait, MockCalls, MockHarvesterClient};
    use k8s_openapi::api::core::v1::PersistentVolumeClaim;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const TEST_UUID: &str = "0f3b5c1e-1111-2222-3333-444455556666";

    fn existing_vm(name: &str) -> VirtualMachine {
        let mut vm = VirtualMachine::new(name, VirtualMachineSpec::default());
        vm.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        vm
    }

    /// Imported image labelled for the scenario's boot image.
    fn labelled_image(provisioner: &crate::Provisioner<MockHarvesterClient>, name: &str) -> VirtualMachineImage {
        let identity = ImageSource::new(
            &provisioner.config().image_factory_url,
            TEST_SCHEMATIC,
            TEST_TALOS_VERSION,
            "amd64",
        )
        .identity();
        VirtualMachineImage {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    VOLUME_ID_LABEL.to_string(),
                    identity.identifier().to_string(),
                )])),
                ..Default::default()
            },
            spec: VirtualMachineImageSpec::default(),
            status: Some(VirtualMachineImageStatus {
                progress: 100,
                ..Default::default()
            }),
        }
    }

    /// State after the schematic step.
    fn schematic_state() -> MachineState {
        MachineState {
            namespace: TEST_NAMESPACE.to_string(),
            schematic: TEST_SCHEMATIC.to_string(),
            ..Default::default()
        }
    }

    /// State after the volume step, with the machine UUID already chosen.
    fn volume_state() -> MachineState {
        MachineState {
            talos_version: TEST_TALOS_VERSION.to_string(),
            volume_id: "talos-existing-abcde".to_string(),
            uuid: TEST_UUID.to_string(),
            ..schematic_state()
        }
    }

    #[tokio::test]
    async fn test_fresh_request_creates_each_resource_once() {
        let mock = mock_platform();
        let provisioner = provisioner(&mock);
        let mut ctx = context("machine-1");

        let outcome = provisioner.provision(&mut ctx).await.unwrap();

        assert_eq!(outcome, Outcome::RetryAfter(PROVISION_RETRY_INTERVAL));
        let calls = mock.calls();
        assert_eq!(calls.create_image, 1);
        assert_eq!(calls.create_volume_claim, 1);
        assert_eq!(calls.create_virtual_machine, 1);
        assert_eq!(calls.replace_virtual_machine, 0);

        let state = ctx.state().clone();
        assert_eq!(state.namespace, TEST_NAMESPACE);
        assert_eq!(state.schematic, TEST_SCHEMATIC);
        assert_eq!(state.talos_version, TEST_TALOS_VERSION);
        assert!(state.volume_id.starts_with("talos-"));
        assert!(!state.uuid.is_empty());
        assert_eq!(ctx.machine_uuid(), Some(state.uuid.as_str()));

        let claims = mock.volume_claims();
        assert_eq!(claims.len(), 1);
        let spec = claims[0].spec.as_ref().unwrap();
        assert_eq!(
            spec.resources.as_ref().unwrap().requests.as_ref().unwrap()["storage"],
            Quantity("20Gi".to_string())
        );
        assert_eq!(
            spec.storage_class_name.as_deref(),
            Some(format!("longhorn-{}", state.volume_id).as_str())
        );

        let vms = mock.virtual_machines();
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].metadata.name.as_deref(), Some("machine-1"));
        let domain = &vms[0].spec.template.spec.domain;
        assert_eq!(domain.cpu.as_ref().unwrap().cores, 2);
        assert_eq!(domain.resources.requests["memory"], Quantity("4096Mi".to_string()));
    }

    #[tokio::test]
    async fn test_second_run_makes_no_mutations() {
        let mock = mock_platform();
        let provisioner = provisioner(&mock);
        let mut first = context("machine-1");
        provisioner.provision(&mut first).await.unwrap();
        let (state, machine_uuid) = first.into_parts();

        mock.reset_calls();
        let mut second = resumed_context("machine-1", state.clone());
        let outcome = provisioner.provision(&mut second).await.unwrap();

        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(mock.calls().mutations(), 0);
        assert_eq!(mock.images().len(), 1);
        assert_eq!(mock.volume_claims().len(), 1);
        assert_eq!(mock.virtual_machines().len(), 1);
        assert_eq!(second.state(), &state);
        assert_eq!(second.machine_uuid(), machine_uuid.as_deref());
    }

    #[tokio::test]
    async fn test_resume_after_image_import_and_claim_binding() {
        let mock = mock_platform();
        mock.set_claim_phase_on_create("Pending");
        let provisioner = provisioner(&mock);

        let mut first = context("machine-1");
        let outcome = provisioner.provision(&mut first).await.unwrap();
        assert_eq!(outcome, Outcome::RetryAfter(PROVISION_RETRY_INTERVAL));
        assert_eq!(mock.volume_claims().len(), 1);
        assert!(mock.virtual_machines().is_empty());

        mock.complete_images();
        mock.bind_volume_claims();
        mock.reset_calls();

        let mut second = resumed_context("machine-1", first.state().clone());
        let outcome = provisioner.provision(&mut second).await.unwrap();

        assert_eq!(outcome, Outcome::RetryAfter(PROVISION_RETRY_INTERVAL));
        let calls = mock.calls();
        assert_eq!(calls.create_image, 0);
        assert_eq!(calls.create_volume_claim, 0);
        assert_eq!(calls.create_virtual_machine, 1);
        assert_eq!(calls.mutations(), 1);
    }

    #[tokio::test]
    async fn test_uuid_is_never_replaced() {
        let mock = mock_platform();
        let provisioner = provisioner(&mock);
        let state = MachineState {
            uuid: "0f3b5c1e-1111-2222-3333-444455556666".to_string(),
            ..Default::default()
        };
        let mut ctx = resumed_context("machine-1", state);

        provisioner.provision(&mut ctx).await.unwrap();
        provisioner.provision(&mut ctx).await.unwrap();

        assert_eq!(ctx.state().uuid, "0f3b5c1e-1111-2222-3333-444455556666");
        assert_eq!(ctx.machine_uuid(), Some("0f3b5c1e-1111-2222-3333-444455556666"));
        assert_eq!(
            mock.volume_claims()[0].metadata.name.as_deref(),
            Some("machine-1-disk-0-0f3b5c1e")
        );
    }

    #[tokio::test]
    async fn test_long_request_id_rejected_before_remote_calls() {
        let mock = mock_platform();
        let schematics = Arc::new(FakeSchematics::default());
        let provisioner = provisioner_with(&mock, Arc::clone(&schematics));
        let mut ctx = context(&"m".repeat(63));

        let err = provisioner.provision(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Validation(_)));
        assert_eq!(mock.calls(), MockCalls::default());
        assert!(schematics.requests().is_empty());
        assert_eq!(ctx.state(), &MachineState::default());
    }

    #[tokio::test]
    async fn test_request_id_at_limit_is_accepted() {
        let provisioner = provisioner(&mock_platform());
        let mut ctx = context(&"m".repeat(62));

        let outcome = provisioner.run_step(Step::ValidateRequest, &mut ctx).await.unwrap();
        assert_eq!(outcome, Outcome::Continue);
    }

    #[tokio::test]
    async fn test_missing_namespace_retries() {
        let mock = MockHarvesterClient::new();
        let provisioner = provisioner(&mock);
        let mut ctx = context("machine-1");

        let outcome = provisioner.provision(&mut ctx).await.unwrap();

        assert_eq!(outcome, Outcome::RetryAfter(PROVISION_RETRY_INTERVAL));
        assert!(ctx.state().namespace.is_empty());
        assert_eq!(mock.calls().mutations(), 0);
    }

    #[tokio::test]
    async fn test_unset_namespace_is_fatal() {
        let provisioner = provisioner(&mock_platform());
        let mut data = scenario_provider_data();
        data.namespace = String::new();
        let mut ctx = crate::ProvisionContext::new("machine-1", TEST_TALOS_VERSION, data);

        let err = provisioner.run_step(Step::Namespace, &mut ctx).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_schematic_request_carries_extra_kernel_args() {
        let mock = mock_platform();
        let schematics = Arc::new(FakeSchematics::default());
        let provisioner = provisioner_with(&mock, Arc::clone(&schematics));
        let mut ctx = context("machine-1")
            .with_kernel_args(vec!["talos.platform=nocloud".to_string()])
            .with_extensions(vec!["siderolabs/qemu-guest-agent".to_string()]);

        provisioner.run_step(Step::CreateSchematic, &mut ctx).await.unwrap();

        let requests = schematics.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].kernel_args,
            vec!["talos.platform=nocloud".to_string(), "console=ttyS0,38400n8".to_string()]
        );
        assert_eq!(requests[0].extensions, vec!["siderolabs/qemu-guest-agent".to_string()]);
        assert_eq!(ctx.state().schematic, TEST_SCHEMATIC);
    }

    #[tokio::test]
    async fn test_schematic_failure_is_surfaced() {
        let mock = mock_platform();
        let provisioner = provisioner_with(&mock, Arc::new(FakeSchematics::failing()));
        let mut ctx = context("machine-1");

        let err = provisioner.provision(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Schematic(_)));
        assert_eq!(ctx.state().namespace, TEST_NAMESPACE);
        assert_eq!(mock.calls().mutations(), 0);
    }

    #[tokio::test]
    async fn test_existing_image_is_reused() {
        let mock = mock_platform();
        let provisioner = provisioner(&mock);
        mock.add_image(TEST_NAMESPACE, labelled_image(&provisioner, "talos-existing-abcde"));

        let mut ctx = resumed_context("machine-1", schematic_state());
        let outcome = provisioner.run_step(Step::EnsureVolume, &mut ctx).await.unwrap();

        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(mock.calls().create_image, 0);
        assert_eq!(ctx.state().volume_id, "talos-existing-abcde");
        assert_eq!(ctx.state().talos_version, TEST_TALOS_VERSION);
    }

    #[tokio::test]
    async fn test_two_requests_share_one_image() {
        let mock = mock_platform();
        let provisioner = provisioner(&mock);

        let mut first = context("machine-1");
        let mut second = context("machine-2");
        provisioner.provision(&mut first).await.unwrap();
        provisioner.provision(&mut second).await.unwrap();

        assert_eq!(mock.calls().create_image, 1);
        assert_eq!(first.state().volume_id, second.state().volume_id);
        assert_eq!(mock.volume_claims().len(), 2);
        assert_eq!(mock.virtual_machines().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_storage_class_is_fatal() {
        let mock = MockHarvesterClient::new();
        mock.add_namespace(TEST_NAMESPACE);
        let provisioner = provisioner(&mock);
        let mut ctx = context("machine-1");

        let err = provisioner.provision(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ProvisionError::InvalidConfig(_)));
        assert_eq!(mock.calls().create_image, 0);
    }

    #[tokio::test]
    async fn test_image_import_timeout_retries_then_reuses() {
        let mock = mock_platform();
        mock.set_image_progress_on_create(40);
        let provisioner = provisioner(&mock);

        let mut ctx = context("machine-1");
        let outcome = provisioner.provision(&mut ctx).await.unwrap();
        assert_eq!(outcome, Outcome::RetryAfter(PROVISION_RETRY_INTERVAL));
        assert!(ctx.state().volume_id.is_empty());
        assert!(mock.volume_claims().is_empty());

        mock.complete_images();
        provisioner.provision(&mut ctx).await.unwrap();

        assert_eq!(mock.calls().create_image, 1);
        assert_eq!(ctx.state().volume_id, mock.images()[0].metadata.name.clone().unwrap());
    }

    #[tokio::test]
    async fn test_image_create_failure_retries() {
        let mock = mock_platform();
        mock.fail("create_image");
        let provisioner = provisioner(&mock);
        let mut ctx = context("machine-1");

        let outcome = provisioner.provision(&mut ctx).await.unwrap();

        assert_eq!(outcome, Outcome::RetryAfter(PROVISION_RETRY_INTERVAL));
        assert!(mock.images().is_empty());
    }

    #[tokio::test]
    async fn test_existing_machine_is_left_alone() {
        let mock = mock_platform();
        mock.add_virtual_machine(TEST_NAMESPACE, existing_vm("machine-1"));
        let provisioner = provisioner(&mock);
        let mut ctx = context("machine-1");

        let outcome = provisioner.provision(&mut ctx).await.unwrap();

        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(mock.calls().create_virtual_machine, 0);
        assert_eq!(mock.calls().replace_virtual_machine, 0);
        assert_eq!(ctx.machine_uuid(), Some(ctx.state().uuid.as_str()));
    }

    #[tokio::test]
    async fn test_machine_uuid_reported_when_machine_step_fails() {
        let mock = mock_platform();
        mock.reject("create_virtual_machine");
        let provisioner = provisioner(&mock);
        let mut ctx = context("machine-1");

        let err = provisioner.provision(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Harvester(_)));
        assert!(ctx.machine_uuid().is_some());
        assert_eq!(ctx.machine_uuid(), Some(ctx.state().uuid.as_str()));
    }

    #[tokio::test]
    async fn test_deprovision_absent_machine() {
        let mock = mock_platform();
        let provisioner = provisioner(&mock);

        let outcome = provisioner.deprovision("machine-1", TEST_NAMESPACE).await;

        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(mock.calls().delete_virtual_machine, 0);
    }

    #[tokio::test]
    async fn test_deprovision_existing_machine() {
        let mock = mock_platform();
        mock.add_virtual_machine(TEST_NAMESPACE, existing_vm("machine-1"));
        let provisioner = provisioner(&mock);

        let outcome = provisioner.deprovision("machine-1", TEST_NAMESPACE).await;

        assert_eq!(outcome, Outcome::Continue);
        let calls = mock.calls();
        assert_eq!(calls.delete_virtual_machine, 1);
        assert_eq!(calls.mutations(), 1);
        assert!(mock.virtual_machines().is_empty());
    }

    #[tokio::test]
    async fn test_deprovision_lookup_failure_retries() {
        let mock = mock_platform();
        mock.fail("get_virtual_machine");
        let provisioner = provisioner(&mock);

        let outcome = provisioner.deprovision("machine-1", TEST_NAMESPACE).await;

        assert_eq!(outcome, Outcome::RetryAfter(DEPROVISION_RETRY_INTERVAL));
        assert_eq!(mock.calls().delete_virtual_machine, 0);
    }

    #[tokio::test]
    async fn test_deprovision_delete_failure_retries() {
        let mock = mock_platform();
        mock.add_virtual_machine(TEST_NAMESPACE, existing_vm("machine-1"));
        mock.fail("delete_virtual_machine");
        let provisioner = provisioner(&mock);

        let outcome = provisioner.deprovision("machine-1", TEST_NAMESPACE).await;

        assert_eq!(outcome, Outcome::RetryAfter(DEPROVISION_RETRY_INTERVAL));
        assert_eq!(mock.virtual_machines().len(), 1);
    }

    #[tokio::test]
    async fn test_deprovision_keeps_shared_resources() {
        let mock = mock_platform();
        let provisioner = provisioner(&mock);
        let mut ctx = context("machine-1");
        provisioner.provision(&mut ctx).await.unwrap();

        let outcome = provisioner.deprovision("machine-1", ctx.namespace()).await;

        assert_eq!(outcome, Outcome::Continue);
        assert!(mock.virtual_machines().is_empty());
        assert_eq!(mock.images().len(), 1);
    }

    #[tokio::test]
    async fn test_image_created_concurrently_is_reused() {
        let mock = mock_platform();
        let provisioner = provisioner(&mock);
        mock.add_image(TEST_NAMESPACE, labelled_image(&provisioner, "talos-concurrent-abcde"));
        mock.stale_lookup("list_images");
        mock.conflict("create_image");

        let mut ctx = resumed_context("machine-1", schematic_state());
        let outcome = provisioner.run_step(Step::EnsureVolume, &mut ctx).await.unwrap();

        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(ctx.state().volume_id, "talos-concurrent-abcde");
        let calls = mock.calls();
        assert_eq!(calls.list_images, 2);
        assert_eq!(calls.create_image, 1);
        assert_eq!(calls.wait_for_image, 0);
        assert_eq!(mock.images().len(), 1);
    }

    #[tokio::test]
    async fn test_image_conflict_without_visible_image_retries() {
        let mock = mock_platform();
        mock.conflict("create_image");
        let provisioner = provisioner(&mock);

        let mut ctx = resumed_context("machine-1", schematic_state());
        let outcome = provisioner.run_step(Step::EnsureVolume, &mut ctx).await.unwrap();

        assert_eq!(outcome, Outcome::RetryAfter(PROVISION_RETRY_INTERVAL));
        assert!(ctx.state().volume_id.is_empty());
        assert_eq!(mock.calls().list_images, 2);
    }

    #[tokio::test]
    async fn test_claim_created_concurrently_is_accepted() {
        let mock = mock_platform();
        let claim_name = volume_state().claim_name("machine-1");
        assert_eq!(claim_name, "machine-1-disk-0-0f3b5c1e");
        mock.add_volume_claim(
            TEST_NAMESPACE,
            PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(claim_name.clone()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        mock.stale_lookup("get_volume_claim");
        let provisioner = provisioner(&mock);

        let mut ctx = resumed_context("machine-1", volume_state());
        let outcome = provisioner.run_step(Step::CreateVolumeClaim, &mut ctx).await.unwrap();

        assert_eq!(outcome, Outcome::Continue);
        let calls = mock.calls();
        assert_eq!(calls.create_volume_claim, 1);
        assert_eq!(calls.wait_for_volume_claim, 0);
        assert_eq!(mock.volume_claims().len(), 1);
        assert_eq!(ctx.state().uuid, TEST_UUID);
    }

    #[tokio::test]
    async fn test_machine_created_concurrently_is_updated() {
        let mock = mock_platform();
        let existing = mock
            .create_virtual_machine(TEST_NAMESPACE, &existing_vm("machine-1"))
            .await
            .unwrap();
        mock.stale_lookup("get_virtual_machine");
        mock.reset_calls();
        let provisioner = provisioner(&mock);

        let mut ctx = resumed_context("machine-1", volume_state());
        let outcome = provisioner.run_step(Step::SyncMachine, &mut ctx).await.unwrap();

        assert_eq!(outcome, Outcome::RetryAfter(PROVISION_RETRY_INTERVAL));
        let calls = mock.calls();
        assert_eq!(calls.get_virtual_machine, 2);
        assert_eq!(calls.create_virtual_machine, 1);
        assert_eq!(calls.replace_virtual_machine, 1);

        let vms = mock.virtual_machines();
        assert_eq!(vms.len(), 1);
        assert_ne!(vms[0].metadata.resource_version, existing.metadata.resource_version);
        assert_eq!(vms[0].spec.template.spec.domain.cpu.as_ref().unwrap().cores, 2);
        assert_eq!(ctx.machine_uuid(), Some(TEST_UUID));
    }

    #[tokio::test]
    async fn test_machine_conflict_after_deletion_retries() {
        let mock = mock_platform();
        mock.conflict("create_virtual_machine");
        let provisioner = provisioner(&mock);

        let mut ctx = resumed_context("machine-1", volume_state());
        let outcome = provisioner.run_step(Step::SyncMachine, &mut ctx).await.unwrap();

        assert_eq!(outcome, Outcome::RetryAfter(PROVISION_RETRY_INTERVAL));
        assert_eq!(mock.calls().replace_virtual_machine, 0);
        assert!(mock.virtual_machines().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_platform_retries() {
        for operation in [
            "get_storage_class",
            "list_images",
            "get_volume_claim",
            "create_volume_claim",
            "get_virtual_machine",
            "create_virtual_machine",
        ] {
            let mock = mock_platform();
            mock.fail(operation);
            let provisioner = provisioner(&mock);
            let mut ctx = context("machine-1");

            let outcome = provisioner.provision(&mut ctx).await;

            assert!(
                matches!(outcome, Ok(Outcome::RetryAfter(interval)) if interval == PROVISION_RETRY_INTERVAL),
                "{} failure should be retried, got {:?}",
                operation,
                outcome
            );
        }
    }

    #[tokio::test]
    async fn test_rejected_platform_calls_fail() {
        for operation in [
            "list_images",
            "get_volume_claim",
            "create_volume_claim",
            "get_virtual_machine",
        ] {
            let mock = mock_platform();
            mock.reject(operation);
            let provisioner = provisioner(&mock);
            let mut ctx = context("machine-1");

            let outcome = provisioner.provision(&mut ctx).await;

            assert!(
                matches!(outcome, Err(ProvisionError::Harvester(_))),
                "{} rejection should be fatal, got {:?}",
                operation,
                outcome
            );
        }
    }
}
