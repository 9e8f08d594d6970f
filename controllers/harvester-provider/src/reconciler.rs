//! Reconciliation logic for MachineRequest resources.
//!
//! Apply runs the provisioning pipeline and persists the resulting state in
//! status; cleanup deletes the machine before the finalizer is released.

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconcile_helpers::{
    action_for, context_for, failure_backoff_remaining, next_status, outcome_label, status_needs_update,
    status_patch,
};
use chrono::Utc;
use crds::{MachineRequest, MachineRequestStatus, ProvisionPhase};
use harvester_client::HarvesterClient;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::finalizer::{finalizer, Event as FinalizerEvent};
use provisioner::{Outcome, ProvisionError, Provisioner};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Finalizer holding a request until its machine is gone.
pub const FINALIZER: &str = "infra.harvester-provider.io/deprovision";

/// Reconciles MachineRequest resources.
pub struct Reconciler {
    client: Client,
    provisioner: Provisioner<HarvesterClient>,
    metrics: Metrics,
    backoff: FibonacciBackoff,
}

impl Reconciler {
    pub fn new(client: Client, provisioner: Provisioner<HarvesterClient>, metrics: Metrics) -> Self {
        Self {
            client,
            provisioner,
            metrics,
            backoff: FibonacciBackoff::default(),
        }
    }

    pub fn backoff(&self) -> &FibonacciBackoff {
        &self.backoff
    }

    /// Reconciles a single request, routing deletions through the finalizer.
    pub async fn reconcile(&self, request: Arc<MachineRequest>) -> Result<Action, ControllerError> {
        let namespace = request.namespace().ok_or_else(|| {
            ControllerError::InvalidConfig(format!("MachineRequest {} has no namespace", request.name_any()))
        })?;
        let api: Api<MachineRequest> = Api::namespaced(self.client.clone(), &namespace);

        finalizer(&api, FINALIZER, request, |event| async {
            match event {
                FinalizerEvent::Apply(request) => self.apply(&api, &request).await,
                FinalizerEvent::Cleanup(request) => self.cleanup(&api, &request).await,
            }
        })
        .await
        .map_err(ControllerError::from)
    }

    async fn apply(&self, api: &Api<MachineRequest>, request: &MachineRequest) -> Result<Action, ControllerError> {
        let name = request.name_any();

        if let Some(remaining) = failure_backoff_remaining(request, &self.backoff, Utc::now()) {
            debug!("Machine request {} failed recently, next attempt in {:?}", name, remaining);
            self.metrics.reconciled("skipped");
            return Ok(Action::requeue(remaining));
        }

        let mut ctx = context_for(request);
        let result = self.provisioner.provision(&mut ctx).await;
        let (state, machine_uuid) = ctx.into_parts();

        let status = next_status(
            request.status.as_ref(),
            request.metadata.generation,
            state,
            machine_uuid,
            &result,
            Utc::now(),
        );
        if status_needs_update(request.status.as_ref(), &status) {
            self.patch_status(api, &name, &status).await?;
        }
        self.metrics.reconciled(outcome_label(&result));

        match result {
            Ok(Outcome::Continue) => {
                info!("Machine request {} is provisioned", name);
                Ok(action_for(Outcome::Continue))
            }
            Ok(outcome) => Ok(action_for(outcome)),
            Err(e) => {
                let delay = self.backoff.for_failures(status.failures);
                error!(
                    "Provisioning machine request {} failed ({} consecutive): {}, retrying in {:?}",
                    name, status.failures, e, delay
                );
                Ok(Action::requeue(delay))
            }
        }
    }

    async fn cleanup(&self, api: &Api<MachineRequest>, request: &MachineRequest) -> Result<Action, ControllerError> {
        let name = request.name_any();

        let mut status = request.status.clone().unwrap_or_default();
        if status.phase != ProvisionPhase::Deprovisioning {
            status.phase = ProvisionPhase::Deprovisioning;
            status.last_reconciled = Some(Utc::now());
            self.patch_status(api, &name, &status).await?;
        }

        let ctx = context_for(request);
        match self.provisioner.deprovision(&name, ctx.namespace()).await {
            Outcome::Continue => {
                info!("Machine request {} deprovisioned", name);
                self.metrics.deprovisioned("deleted");
                Ok(Action::await_change())
            }
            Outcome::RetryAfter(interval) => {
                warn!("Machine for request {} not deleted yet", name);
                self.metrics.deprovisioned("retry");
                Err(ControllerError::DeprovisionPending(interval))
            }
        }
    }

    async fn patch_status(
        &self,
        api: &Api<MachineRequest>,
        name: &str,
        status: &MachineRequestStatus,
    ) -> Result<(), ControllerError> {
        let patch = status_patch(status).map_err(ProvisionError::from)?;
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!("Updated status of machine request {} to {:?}", name, status.phase);
        Ok(())
    }
}
