//! Primary disk claim step

use crate::context::ProvisionContext;
use crate::error::ProvisionError;
use crate::labels::{IMAGE_ID_ANNOTATION, VOLUME_ID_LABEL};
use crate::pipeline::{Outcome, Provisioner};
use crds::{MachineState, ProviderData};
use harvester_client::{claim_phase, HarvesterClientTrait, WaitOutcome};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

pub(crate) const CLAIM_ACCESS_MODE: &str = "ReadWriteMany";
pub(crate) const BLOCK_VOLUME_MODE: &str = "Block";

/// Claim for the primary disk, cloned from the boot image through the
/// image's storage class.
pub fn build_volume_claim(
    claim_name: &str,
    state: &MachineState,
    data: &ProviderData,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim_name.to_string()),
            namespace: Some(state.namespace.clone()),
            labels: Some(BTreeMap::from([(
                VOLUME_ID_LABEL.to_string(),
                state.volume_id.clone(),
            )])),
            annotations: Some(BTreeMap::from([(
                IMAGE_ID_ANNOTATION.to_string(),
                state.image_ref(),
            )])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![CLAIM_ACCESS_MODE.to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(data.disk_quantity()),
                )])),
                ..Default::default()
            }),
            volume_mode: Some(BLOCK_VOLUME_MODE.to_string()),
            storage_class_name: Some(state.image_storage_class()),
            ..Default::default()
        }),
        status: None,
    }
}

impl<C: HarvesterClientTrait> Provisioner<C> {
    /// Ensures the primary disk claim exists and waits for it to bind.
    ///
    /// The machine UUID is fixed here, since the claim name depends on it.
    pub(crate) async fn ensure_volume_claim(
        &self,
        ctx: &mut ProvisionContext,
    ) -> Result<Outcome, ProvisionError> {
        ctx.state_mut()
            .uuid_or_insert_with(|| Uuid::new_v4().to_string());

        let namespace = ctx.namespace().to_string();
        let claim_name = ctx.state().claim_name(ctx.request_id());

        match self.client.get_volume_claim(&namespace, &claim_name).await {
            Ok(_) => {
                info!("Claim {} already exists", claim_name);
                return Ok(Outcome::Continue);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return self.retry_transient(e, &format!("look up claim {}", claim_name)),
        }

        let claim = build_volume_claim(&claim_name, ctx.state(), ctx.provider_data());
        match self.client.create_volume_claim(&namespace, &claim).await {
            Ok(_) => info!("Created claim {}", claim_name),
            Err(e) if e.is_already_exists() => {
                info!("Claim {} was created concurrently", claim_name);
                return Ok(Outcome::Continue);
            }
            Err(e) => return self.retry_transient(e, &format!("create claim {}", claim_name)),
        }

        match self
            .client
            .wait_for_volume_claim(&namespace, &claim_name, self.config.wait_timeout)
            .await
        {
            Ok(WaitOutcome::Ready(claim)) => {
                info!("Claim {} is {}", claim_name, claim_phase(&claim));
                Ok(Outcome::Continue)
            }
            Ok(WaitOutcome::NotReady) => {
                warn!(
                    "Claim {} not bound within {:?}",
                    claim_name, self.config.wait_timeout
                );
                Ok(self.retry())
            }
            Err(e) => {
                warn!("Failed to watch claim {}: {}", claim_name, e);
                Ok(self.retry())
            }
        }
    }
}
