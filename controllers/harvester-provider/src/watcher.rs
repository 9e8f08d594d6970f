//! MachineRequest watcher.
//!
//! Drives reconciliation through `kube_runtime::Controller`, which handles
//! reconnection and per-object queueing.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::MachineRequest;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const DEBOUNCE: Duration = Duration::from_secs(5);
const CONCURRENCY: u16 = 4;

/// Requeue policy for reconcile errors.
fn error_policy(request: Arc<MachineRequest>, error: &ControllerError, reconciler: Arc<Reconciler>) -> Action {
    match error {
        ControllerError::DeprovisionPending(interval) => Action::requeue(*interval),
        _ => {
            let delay = reconciler.backoff().for_failures(request.failures().saturating_add(1));
            error!(
                "Reconciliation error for machine request {}: {}, retrying in {:?}",
                request.name_any(),
                error,
                delay
            );
            Action::requeue(delay)
        }
    }
}

/// Watches machine requests until the watch stream ends.
pub async fn watch_machine_requests(
    api: Api<MachineRequest>,
    reconciler: Arc<Reconciler>,
) -> Result<(), ControllerError> {
    info!("Starting MachineRequest watcher");

    let reconcile = |request: Arc<MachineRequest>, reconciler: Arc<Reconciler>| async move {
        debug!("Reconciling machine request {}", request.name_any());
        reconciler.reconcile(request).await
    };

    let controller_config = ControllerConfig::default()
        .debounce(DEBOUNCE)
        .concurrency(CONCURRENCY);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((object, _)) => debug!("Reconciled machine request {}", object.name),
                Err(e) => error!("MachineRequest controller error: {}", e),
            }
        })
        .await;

    Err(ControllerError::Watch("MachineRequest watch stream ended".to_string()))
}
