//! Deprovisioning
//!
//! Removes a withdrawn request's VM. The claim goes with it through the
//! foreground cascade; the boot image is shared and always kept.

use crate::pipeline::{Outcome, Provisioner};
use harvester_client::HarvesterClientTrait;
use tracing::{info, info_span, warn, Instrument};

impl<C: HarvesterClientTrait> Provisioner<C> {
    /// Deletes the VM named `request_id` in `namespace`.
    ///
    /// Absence counts as success. Any other failure asks for a short retry.
    pub async fn deprovision(&self, request_id: &str, namespace: &str) -> Outcome {
        async move {
            info!("Deprovisioning machine {}", request_id);

            if namespace.is_empty() {
                info!("No namespace recorded, nothing was provisioned");
                return Outcome::Continue;
            }

            match self.client.get_virtual_machine(namespace, request_id).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    info!("Machine {} not found, skipping deletion", request_id);
                    return Outcome::Continue;
                }
                Err(e) => {
                    warn!("Failed to get machine {}: {}", request_id, e);
                    return self.deprovision_retry();
                }
            }

            match self.client.delete_virtual_machine(namespace, request_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!("Failed to delete machine {}: {}", request_id, e);
                    return self.deprovision_retry();
                }
            }

            info!("Machine {} deleted", request_id);
            Outcome::Continue
        }
        .instrument(info_span!("deprovision", request_id = %request_id))
        .await
    }

    fn deprovision_retry(&self) -> Outcome {
        Outcome::RetryAfter(self.config.deprovision_retry_interval)
    }
}
